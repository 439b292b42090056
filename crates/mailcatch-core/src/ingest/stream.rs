//! Message byte streams
//!
//! The transport pushes message bytes through a [`MessageSink`]; consumers
//! read them from the paired [`MessageStream`]. A stream only ends cleanly
//! when the sink calls [`MessageSink::finish`]. Aborting, or dropping the
//! sink, surfaces as an error on the consumer side.

use bytes::Bytes;
use std::io;
use tokio::sync::mpsc;

/// Default number of chunks buffered between producer and consumer
pub const DEFAULT_STREAM_DEPTH: usize = 64;

#[derive(Debug)]
enum Frame {
    Data(Bytes),
    End,
    Abort(String),
}

/// Producer half of a message stream
#[derive(Debug)]
pub struct MessageSink {
    tx: mpsc::Sender<Frame>,
}

/// Consumer half of a message stream
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::Receiver<Frame>,
    done: bool,
}

/// Create a connected sink/stream pair
pub fn message_channel(depth: usize) -> (MessageSink, MessageStream) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (MessageSink { tx }, MessageStream { rx, done: false })
}

impl MessageSink {
    /// Push a chunk. Returns false once the consumer has gone away.
    pub async fn send(&self, chunk: Bytes) -> bool {
        self.tx.send(Frame::Data(chunk)).await.is_ok()
    }

    /// Mark the end of the message
    pub async fn finish(self) {
        let _ = self.tx.send(Frame::End).await;
    }

    /// Terminate the stream with an error
    pub async fn abort(self, reason: impl Into<String>) {
        let _ = self.tx.send(Frame::Abort(reason.into())).await;
    }
}

impl MessageStream {
    /// A complete stream holding `data` as a single chunk
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let (tx, rx) = mpsc::channel(2);
        let _ = tx.try_send(Frame::Data(data.into()));
        let _ = tx.try_send(Frame::End);
        Self { rx, done: false }
    }

    /// Next chunk, `None` at a clean end, `Some(Err(_))` if the producer
    /// aborted or vanished
    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.done {
            return None;
        }

        match self.rx.recv().await {
            Some(Frame::Data(chunk)) => Some(Ok(chunk)),
            Some(Frame::End) => {
                self.done = true;
                None
            }
            Some(Frame::Abort(reason)) => {
                self.done = true;
                Some(Err(io::Error::new(io::ErrorKind::Other, reason)))
            }
            None => {
                self.done = true;
                Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "message stream closed before end of data",
                )))
            }
        }
    }

    /// Drain the stream into memory
    pub async fn collect(mut self) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clean_end() {
        let (sink, stream) = message_channel(4);
        assert!(sink.send(Bytes::from_static(b"Subject: hi\r\n")).await);
        assert!(sink.send(Bytes::from_static(b"\r\nbody\r\n")).await);
        sink.finish().await;

        assert_eq!(stream.collect().await.unwrap(), b"Subject: hi\r\n\r\nbody\r\n");
    }

    #[tokio::test]
    async fn test_abort_is_an_error() {
        let (sink, mut stream) = message_channel(4);
        sink.send(Bytes::from_static(b"partial")).await;
        sink.abort("connection closed during DATA").await;

        let chunk = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"partial");
        let err = stream.next_chunk().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("connection closed"));
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_sink_is_an_error() {
        let (sink, stream) = message_channel(4);
        sink.send(Bytes::from_static(b"partial")).await;
        drop(sink);

        let err = stream.collect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_send_reports_gone_consumer() {
        let (sink, stream) = message_channel(4);
        drop(stream);
        assert!(!sink.send(Bytes::from_static(b"x")).await);
    }

    #[tokio::test]
    async fn test_from_bytes() {
        let stream = MessageStream::from_bytes(&b"hello"[..]);
        assert_eq!(stream.collect().await.unwrap(), b"hello");
    }
}
