//! Message Ingestor - Captures one inbound message for one recipient
//!
//! The inbound stream is fanned out to two consumers running side by side:
//! a raw copy into `<label>.raw` and the decoder. Once both are done the
//! decoded document (`<label>.json`) or the failure detail (`<label>.err`)
//! is written next to the raw copy.

use super::decode::{DecodeError, MessageDecoder};
use super::stream::{message_channel, MessageSink, MessageStream, DEFAULT_STREAM_DEPTH};
use chrono::Utc;
use mailcatch_common::{Error, Result, TransactionSummary};
use mailcatch_storage::{FileStorage, RecipientFolder, RecipientStore};
use serde_json::json;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Drives raw capture and decoding for inbound messages
pub struct MessageIngestor<S: FileStorage> {
    store: Arc<RecipientStore<S>>,
    decoder: Arc<dyn MessageDecoder>,
}

impl<S: FileStorage + 'static> MessageIngestor<S> {
    /// Create a new ingestor
    pub fn new(store: Arc<RecipientStore<S>>, decoder: Arc<dyn MessageDecoder>) -> Self {
        Self { store, decoder }
    }

    /// Capture `stream` into `folder`. Never fails; every failure ends up in
    /// the returned summary.
    pub async fn ingest(
        &self,
        folder: &RecipientFolder,
        message_id: &str,
        stream: MessageStream,
    ) -> TransactionSummary {
        let mut summary = TransactionSummary::begin(folder.path.clone(), message_id, Utc::now());
        let label = summary.label();

        if let Err(e) = self.store.ensure_directory(folder).await {
            warn!(folder = %folder.path, error = %e, "Failed to create recipient folder");
            summary.write_err = Some(e.to_string());
        }

        let (raw_sink, raw_stream) = message_channel(DEFAULT_STREAM_DEPTH);
        let (decode_sink, decode_stream) = message_channel(DEFAULT_STREAM_DEPTH);

        let raw_name = format!("{}.raw", label);
        let (_, raw_result, decoded) = tokio::join!(
            fan_out(stream, raw_sink, decode_sink),
            self.capture_raw(folder, &raw_name, raw_stream),
            self.decode(decode_stream),
        );

        let (file_name, body) = match decoded {
            Ok(message) => {
                let file_name = format!("{}.json", label);
                summary.from = message.from.first().cloned();
                summary.subject = message.subject;
                summary.filename = file_name.clone();
                let body = serde_json::to_vec_pretty(&message.document).unwrap_or_default();
                (file_name, body)
            }
            Err(e) => {
                debug!(message_id = %message_id, error = %e, "Message could not be decoded");
                let detail = json!({
                    "error": e.kind(),
                    "message": e.to_string(),
                });
                summary.error = Some(e.to_string());
                let body = serde_json::to_vec_pretty(&detail).unwrap_or_default();
                (format!("{}.err", label), body)
            }
        };

        if let Err(e) = self.store.write_artifact(folder, &file_name, &body).await {
            warn!(file = %file_name, error = %e, "Failed to write message artifact");
            summary.write_err.get_or_insert_with(|| e.to_string());
        }

        match raw_result {
            Ok(bytes) => debug!(file = %raw_name, bytes, "Captured raw message"),
            Err(e) => {
                warn!(file = %raw_name, error = %e, "Raw capture failed");
                summary.write_err.get_or_insert_with(|| e.to_string());
            }
        }

        summary
    }

    async fn capture_raw(
        &self,
        folder: &RecipientFolder,
        file_name: &str,
        mut stream: MessageStream,
    ) -> Result<u64> {
        let mut writer = self.store.open_artifact(folder, file_name).await?;
        let mut written = 0u64;

        while let Some(chunk) = stream.next_chunk().await {
            let chunk = chunk
                .map_err(|e| Error::Storage(format!("Raw capture of {} interrupted: {}", file_name, e)))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| Error::Storage(format!("Failed to write {}: {}", file_name, e)))?;
            written += chunk.len() as u64;
        }

        writer
            .shutdown()
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", file_name, e)))?;

        Ok(written)
    }

    async fn decode(
        &self,
        stream: MessageStream,
    ) -> std::result::Result<super::decode::DecodedMessage, DecodeError> {
        let raw = stream
            .collect()
            .await
            .map_err(|e| DecodeError::Interrupted(e.to_string()))?;

        let decoder = self.decoder.clone();
        tokio::task::spawn_blocking(move || decoder.decode(&raw))
            .await
            .map_err(|e| DecodeError::Failed(e.to_string()))?
    }
}

/// Copy every chunk of `source` to both sinks. A consumer that stops early
/// does not starve the other one.
async fn fan_out(mut source: MessageStream, first: MessageSink, second: MessageSink) {
    let mut first_open = true;
    let mut second_open = true;

    while let Some(chunk) = source.next_chunk().await {
        match chunk {
            Ok(chunk) => {
                if first_open {
                    first_open = first.send(chunk.clone()).await;
                }
                if second_open {
                    second_open = second.send(chunk).await;
                }
            }
            Err(e) => {
                let reason = e.to_string();
                first.abort(reason.clone()).await;
                second.abort(reason).await;
                return;
            }
        }
    }

    first.finish().await;
    second.finish().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::decode::{DecodedMessage, MailParserDecoder};
    use bytes::Bytes;
    use mailcatch_storage::{ArtifactWriter, LocalStorage};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const MESSAGE: &[u8] = b"From: sender@example.org\r\nTo: user@example.com\r\nSubject: Hello\r\n\r\nHi there\r\n";

    fn ingestor(temp_dir: &TempDir) -> (Arc<RecipientStore<LocalStorage>>, MessageIngestor<LocalStorage>) {
        let storage = Arc::new(LocalStorage::from_path(&temp_dir.path().join("mail")).unwrap());
        let store = Arc::new(RecipientStore::new(storage, "mail"));
        let ingestor = MessageIngestor::new(store.clone(), Arc::new(MailParserDecoder));
        (store, ingestor)
    }

    fn read(temp_dir: &TempDir, folder: &RecipientFolder, file: &str) -> Vec<u8> {
        std::fs::read(temp_dir.path().join("mail").join(&folder.name).join(file)).unwrap()
    }

    #[tokio::test]
    async fn test_successful_ingest() {
        let temp_dir = TempDir::new().unwrap();
        let (store, ingestor) = ingestor(&temp_dir);
        let folder = store.folder_for("user@example.com");

        let summary = ingestor
            .ingest(&folder, "m1", MessageStream::from_bytes(MESSAGE))
            .await;

        assert_eq!(summary.recipient_folder_path, "mail/user@example.com");
        assert_eq!(summary.message_id, "m1");
        assert_eq!(summary.from.as_deref(), Some("sender@example.org"));
        assert_eq!(summary.subject.as_deref(), Some("Hello"));
        assert_eq!(summary.filename, format!("{}.json", summary.label()));
        assert_eq!(summary.error, None);
        assert_eq!(summary.write_err, None);

        assert_eq!(read(&temp_dir, &folder, &format!("{}.raw", summary.label())), MESSAGE);
        let doc: serde_json::Value =
            serde_json::from_slice(&read(&temp_dir, &folder, &summary.filename)).unwrap();
        assert_eq!(doc["subject"], "Hello");
    }

    #[tokio::test]
    async fn test_unparseable_message_writes_err_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let (store, ingestor) = ingestor(&temp_dir);
        let folder = store.folder_for("user@example.com");

        let summary = ingestor
            .ingest(&folder, "m2", MessageStream::from_bytes(&b""[..]))
            .await;

        assert_eq!(summary.filename, "");
        assert_eq!(summary.error.as_deref(), Some("message is empty"));
        assert_eq!(summary.from, None);

        let detail: serde_json::Value = serde_json::from_slice(&read(
            &temp_dir,
            &folder,
            &format!("{}.err", summary.label()),
        ))
        .unwrap();
        assert_eq!(detail["error"], "EMPTY");
        assert!(temp_dir
            .path()
            .join("mail/user@example.com")
            .join(format!("{}.raw", summary.label()))
            .exists());
    }

    #[tokio::test]
    async fn test_interrupted_stream_is_captured_as_error() {
        let temp_dir = TempDir::new().unwrap();
        let (store, ingestor) = ingestor(&temp_dir);
        let folder = store.folder_for("user@example.com");

        let (sink, stream) = message_channel(4);
        let feeder = async move {
            sink.send(Bytes::from_static(b"Subject: cut off\r\n")).await;
            sink.abort("connection closed during DATA").await;
        };
        let (summary, _) = tokio::join!(ingestor.ingest(&folder, "m3", stream), feeder);

        assert_eq!(summary.filename, "");
        assert!(summary.error.as_ref().unwrap().contains("connection closed during DATA"));
        assert!(summary.write_err.as_ref().unwrap().contains("interrupted"));
        assert!(temp_dir
            .path()
            .join("mail/user@example.com")
            .join(format!("{}.err", summary.label()))
            .exists());
    }

    struct RejectingDecoder;

    impl MessageDecoder for RejectingDecoder {
        fn decode(&self, _raw: &[u8]) -> std::result::Result<DecodedMessage, DecodeError> {
            Err(DecodeError::Unparseable)
        }
    }

    #[tokio::test]
    async fn test_decoder_failure_keeps_raw_copy() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::from_path(&temp_dir.path().join("mail")).unwrap());
        let store = Arc::new(RecipientStore::new(storage, "mail"));
        let ingestor = MessageIngestor::new(store.clone(), Arc::new(RejectingDecoder));
        let folder = store.folder_for("user@example.com");

        let summary = ingestor
            .ingest(&folder, "m4", MessageStream::from_bytes(MESSAGE))
            .await;

        assert_eq!(summary.error.as_deref(), Some("unable to parse message"));
        assert_eq!(summary.write_err, None);
        assert_eq!(read(&temp_dir, &folder, &format!("{}.raw", summary.label())), MESSAGE);
    }

    /// Storage whose complete-file writes fail while streaming writes work
    struct NoStoreStorage(LocalStorage);

    #[async_trait]
    impl FileStorage for NoStoreStorage {
        async fn ensure_dir(&self, path: &str) -> Result<()> {
            self.0.ensure_dir(path).await
        }
        async fn store(&self, _path: &str, _data: &[u8]) -> Result<String> {
            Err(Error::Storage("disk full".to_string()))
        }
        async fn replace(&self, path: &str, data: &[u8]) -> Result<()> {
            self.0.replace(path, data).await
        }
        async fn writer(&self, path: &str) -> Result<ArtifactWriter> {
            self.0.writer(path).await
        }
        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            self.0.read(path).await
        }
        async fn exists(&self, path: &str) -> Result<bool> {
            self.0.exists(path).await
        }
    }

    #[tokio::test]
    async fn test_artifact_write_failure_sets_write_err() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(NoStoreStorage(LocalStorage::from_path(temp_dir.path()).unwrap()));
        let store = Arc::new(RecipientStore::new(storage, "mail"));
        let ingestor = MessageIngestor::new(store.clone(), Arc::new(MailParserDecoder));
        let folder = store.folder_for("user@example.com");

        let summary = ingestor
            .ingest(&folder, "m5", MessageStream::from_bytes(MESSAGE))
            .await;

        // Decode outcome is untouched by the write failure
        assert!(summary.is_decoded());
        assert_eq!(summary.error, None);
        assert_eq!(summary.write_err.as_deref(), Some("Storage error: disk full"));
    }
}
