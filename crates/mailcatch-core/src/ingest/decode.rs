//! Message decoding
//!
//! The decoder turns raw RFC 5322 bytes into a JSON document plus the few
//! fields the transaction summary needs.

use mail_parser::{Address, MessageParser, MimeHeaders};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a message could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message is empty")]
    Empty,

    #[error("unable to parse message")]
    Unparseable,

    #[error("message has no header fields")]
    NoHeaders,

    #[error("message stream interrupted: {0}")]
    Interrupted(String),

    #[error("decoder failed: {0}")]
    Failed(String),
}

impl DecodeError {
    /// Short machine-readable kind, stored in error artifacts
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Empty => "EMPTY",
            DecodeError::Unparseable => "UNPARSEABLE",
            DecodeError::NoHeaders => "NO_HEADERS",
            DecodeError::Interrupted(_) => "INTERRUPTED",
            DecodeError::Failed(_) => "DECODER_FAILED",
        }
    }
}

/// Result of a successful decode
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Sender addresses in header order
    pub from: Vec<String>,
    pub subject: Option<String>,
    /// Full representation written to the `.json` artifact
    pub document: Value,
}

/// Decode collaborator boundary
pub trait MessageDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<DecodedMessage, DecodeError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MailboxJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentJson {
    filename: Option<String>,
    content_type: String,
    size: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageJson {
    headers: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    from: Vec<MailboxJson>,
    to: Vec<MailboxJson>,
    cc: Vec<MailboxJson>,
    reply_to: Vec<MailboxJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
    attachments: Vec<AttachmentJson>,
}

fn mailboxes(address: Option<&Address<'_>>) -> Vec<MailboxJson> {
    address
        .map(|list| {
            list.iter()
                .map(|addr| MailboxJson {
                    name: addr.name().map(str::to_string),
                    address: addr.address().map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decoder backed by `mail-parser`
#[derive(Debug, Default, Clone)]
pub struct MailParserDecoder;

impl MessageDecoder for MailParserDecoder {
    fn decode(&self, raw: &[u8]) -> Result<DecodedMessage, DecodeError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }

        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or(DecodeError::Unparseable)?;

        if parsed.headers().is_empty() {
            return Err(DecodeError::NoHeaders);
        }

        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for header in parsed.headers() {
            let value = header.value().as_text().unwrap_or("").to_string();
            headers
                .entry(header.name().to_lowercase())
                .or_default()
                .push(value);
        }

        let attachments = parsed
            .attachments()
            .map(|part| AttachmentJson {
                filename: part.attachment_name().map(str::to_string),
                content_type: part
                    .content_type()
                    .map(|ct| match ct.subtype() {
                        Some(sub) => format!("{}/{}", ct.ctype(), sub),
                        None => ct.ctype().to_string(),
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size: part.contents().len(),
            })
            .collect();

        let json = MessageJson {
            headers,
            message_id: parsed.message_id().map(str::to_string),
            date: parsed.date().map(|d| d.to_rfc3339()),
            subject: parsed.subject().map(str::to_string),
            from: mailboxes(parsed.from()),
            to: mailboxes(parsed.to()),
            cc: mailboxes(parsed.cc()),
            reply_to: mailboxes(parsed.reply_to()),
            text: parsed.body_text(0).map(|s| s.into_owned()),
            html: parsed.body_html(0).map(|s| s.into_owned()),
            attachments,
        };

        let from = json
            .from
            .iter()
            .filter_map(|m| m.address.clone())
            .collect();
        let subject = json.subject.clone();
        let document =
            serde_json::to_value(&json).map_err(|e| DecodeError::Failed(e.to_string()))?;

        Ok(DecodedMessage {
            from,
            subject,
            document,
        })
    }
}
