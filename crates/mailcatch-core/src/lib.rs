//! MailCatch Core - SMTP capture and message ingestion
//!
//! This crate accepts mail over SMTP, applies the connection policy, stores
//! a raw and a decoded copy of every message per recipient and records each
//! attempt in the weekly index.

pub mod capture;
pub mod ingest;
pub mod policy;
pub mod smtp;

pub use capture::{CaptureService, MAIL_ROOT_LABEL};
pub use ingest::{
    message_channel, DecodeError, DecodedMessage, MailParserDecoder, MessageDecoder,
    MessageIngestor, MessageSink, MessageStream,
};
pub use policy::{ConnectionDecision, ConnectionPolicy, RecipientRejected};
pub use smtp::{MailHandler, SmtpServer, SmtpSession};
