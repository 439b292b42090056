//! Capture pipeline wiring
//!
//! [`CaptureService`] is the [`MailHandler`] the SMTP listener talks to. It
//! applies the connection policy, ingests each accepted message into the
//! recipient folder and records the outcome in the weekly index.

use crate::ingest::{MailParserDecoder, MessageDecoder, MessageIngestor, MessageStream};
use crate::policy::{ConnectionDecision, ConnectionPolicy, RecipientRejected};
use crate::smtp::MailHandler;
use async_trait::async_trait;
use mailcatch_common::TransactionSummary;
use mailcatch_storage::{FileStorage, RecipientStore, WeeklyIndexManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Folder prefix recorded in summaries
pub const MAIL_ROOT_LABEL: &str = "mail";

pub struct CaptureService<S: FileStorage> {
    policy: ConnectionPolicy,
    store: Arc<RecipientStore<S>>,
    ingestor: MessageIngestor<S>,
    index: Arc<WeeklyIndexManager<S>>,
}

impl<S: FileStorage + 'static> CaptureService<S> {
    /// Create a capture service using the `mail-parser` decoder
    pub fn new(policy: ConnectionPolicy, storage: Arc<S>) -> Self {
        Self::with_decoder(policy, storage, Arc::new(MailParserDecoder))
    }

    /// Create a capture service with a custom decoder
    pub fn with_decoder(
        policy: ConnectionPolicy,
        storage: Arc<S>,
        decoder: Arc<dyn MessageDecoder>,
    ) -> Self {
        let store = Arc::new(RecipientStore::new(storage.clone(), MAIL_ROOT_LABEL));
        Self {
            policy,
            ingestor: MessageIngestor::new(store.clone(), decoder),
            store,
            index: Arc::new(WeeklyIndexManager::new(storage)),
        }
    }

    /// Weekly index shared with readers
    pub fn index(&self) -> Arc<WeeklyIndexManager<S>> {
        self.index.clone()
    }

    /// Capture one message for one recipient and index the result.
    ///
    /// An index update failure is logged; the returned summary still
    /// describes what was written to the recipient folder.
    pub async fn capture(
        &self,
        recipient: &str,
        message_id: &str,
        stream: MessageStream,
    ) -> TransactionSummary {
        let folder = self.store.folder_for(recipient);
        let summary = self.ingestor.ingest(&folder, message_id, stream).await;

        if let Err(e) = self.index.append_summary(&summary).await {
            error!(
                message_id = %message_id,
                bucket = %summary.bucket(),
                error = %e,
                "Failed to update weekly index"
            );
        }

        info!(
            recipient = %recipient,
            message_id = %message_id,
            decoded = summary.is_decoded(),
            "Captured message"
        );

        summary
    }
}

#[async_trait]
impl<S: FileStorage + 'static> MailHandler for CaptureService<S> {
    async fn on_connect(&self, peer_addr: SocketAddr) -> ConnectionDecision {
        self.policy.decide_connection(peer_addr)
    }

    async fn on_rcpt(&self, recipient: &str) -> Result<(), RecipientRejected> {
        self.policy.decide_recipient(recipient)
    }

    fn mailbox_key(&self, recipient: &str) -> String {
        self.store.folder_for(recipient).name
    }

    async fn on_message(&self, recipient: String, message_id: String, stream: MessageStream) {
        self.capture(&recipient, &message_id, stream).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailcatch_storage::LocalStorage;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const MESSAGE: &[u8] = b"From: sender@example.org\r\nSubject: Weekly\r\n\r\nbody\r\n";

    fn service(temp_dir: &TempDir) -> CaptureService<LocalStorage> {
        let storage = Arc::new(LocalStorage::from_path(temp_dir.path()).unwrap());
        CaptureService::new(ConnectionPolicy::new(["example.com"], ""), storage)
    }

    #[tokio::test]
    async fn test_capture_indexes_summary() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        let first = service
            .capture("user@example.com", "m1", MessageStream::from_bytes(MESSAGE))
            .await;
        let second = service
            .capture("other@example.com", "m2", MessageStream::from_bytes(&b""[..]))
            .await;

        // The latest capture heads its bucket even across a week boundary
        let latest = service.index().load(second.bucket()).await;
        assert_eq!(latest.messages[0], second);
        assert!(second.error.is_some());

        let index = service.index().load(first.bucket()).await;
        assert_eq!(index.messages.iter().find(|s| s.message_id == "m1").unwrap(), &first);
        assert_eq!(index.messages.len(), if first.bucket() == second.bucket() { 2 } else { 1 });

        let on_disk = temp_dir.path().join(first.bucket().file_name());
        assert!(on_disk.exists());
    }

    #[test]
    fn test_mailbox_key_is_the_sanitized_folder() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        assert_eq!(service.mailbox_key("ab@example.com"), "ab@example.com");
        assert_eq!(service.mailbox_key("a:b@example.com"), service.mailbox_key("ab@example.com"));
        assert_ne!(service.mailbox_key("Ab@example.com"), service.mailbox_key("ab@example.com"));
    }

    #[tokio::test]
    async fn test_handler_delegates_to_policy() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir);

        assert!(service.on_rcpt("user@example.com").await.is_ok());
        assert!(service.on_rcpt("user@example.net").await.is_err());
        assert_eq!(
            service.on_connect("192.0.2.1:1".parse().unwrap()).await,
            ConnectionDecision::Accept
        );
    }
}
