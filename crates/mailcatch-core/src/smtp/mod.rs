//! SMTP listener
//!
//! The transport owns the protocol dialogue only. Every policy decision and
//! every accepted message is handed to a [`MailHandler`].

mod server;
mod session;

pub use server::SmtpServer;
pub use session::SmtpSession;

use crate::ingest::MessageStream;
use crate::policy::{ConnectionDecision, RecipientRejected};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Callbacks the SMTP transport drives during a session
#[async_trait]
pub trait MailHandler: Send + Sync + 'static {
    /// Decide whether a new connection may proceed
    async fn on_connect(&self, peer_addr: SocketAddr) -> ConnectionDecision;

    /// Decide whether one envelope recipient is accepted
    async fn on_rcpt(&self, recipient: &str) -> Result<(), RecipientRejected>;

    /// Storage key of an accepted recipient. Recipients of one envelope that
    /// share a key are handed to [`MailHandler::on_message`] only once.
    fn mailbox_key(&self, recipient: &str) -> String {
        recipient.to_string()
    }

    /// Consume the message stream for one accepted recipient. The transport
    /// acknowledges the message once every call for it has returned.
    async fn on_message(&self, recipient: String, message_id: String, stream: MessageStream);
}
