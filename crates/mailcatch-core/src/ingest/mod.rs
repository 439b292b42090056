//! Message ingestion: byte streams, decoding and per-recipient capture

mod decode;
mod ingestor;
mod stream;

pub use decode::{DecodeError, DecodedMessage, MailParserDecoder, MessageDecoder};
pub use ingestor::MessageIngestor;
pub use stream::{message_channel, MessageSink, MessageStream, DEFAULT_STREAM_DEPTH};
