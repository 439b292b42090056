//! SMTP session handler

use super::MailHandler;
use crate::ingest::{message_channel, MessageSink, DEFAULT_STREAM_DEPTH};
use crate::policy::ConnectionDecision;
use anyhow::Result;
use bytes::{Bytes, BytesMut};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    BufWriter,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bytes buffered before a chunk is pushed to the recipient streams
const CHUNK_SIZE: usize = 16 * 1024;

/// Longest accepted command line, terminator included
const MAX_COMMAND_LINE: usize = 1024;

/// Most bytes taken from the peer in one DATA read
const MAX_DATA_READ: usize = 8 * 1024;

/// SMTP session state
#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionState {
    Connected,
    Greeted,
    MailFrom,
    RcptTo,
}

/// How the DATA phase ended
#[derive(Debug)]
enum DataOutcome {
    Complete(usize),
    TooLarge,
    Disconnected,
}

/// Accepted recipients of the current transaction
#[derive(Debug, Default)]
struct Envelope {
    recipients: Vec<String>,
    mailboxes: HashSet<String>,
}

impl Envelope {
    /// Add a recipient; false if its mailbox is already in the envelope
    fn add(&mut self, recipient: &str, mailbox: String) -> bool {
        if !self.mailboxes.insert(mailbox) {
            return false;
        }
        self.recipients.push(recipient.to_string());
        true
    }

    fn clear(&mut self) {
        self.recipients.clear();
        self.mailboxes.clear();
    }
}

/// One SMTP conversation with one peer
pub struct SmtpSession {
    hostname: String,
    max_message_size: usize,
    handler: Arc<dyn MailHandler>,
    peer_addr: SocketAddr,
}

impl SmtpSession {
    /// Create a new session
    pub fn new(
        hostname: impl Into<String>,
        max_message_size: usize,
        handler: Arc<dyn MailHandler>,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            max_message_size,
            handler,
            peer_addr,
        }
    }

    /// Run the session until the peer quits or disconnects
    pub async fn handle<T>(self, stream: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        if let ConnectionDecision::Reject(reason) = self.handler.on_connect(self.peer_addr).await {
            info!("Rejecting connection from {}: {}", self.peer_addr, reason);
            self.send_response(&mut writer, 554, &format!("5.7.1 {}", reason))
                .await?;
            return Ok(());
        }

        let mut state = SessionState::Connected;
        let mut envelope = Envelope::default();

        self.send_response(&mut writer, 220, &format!("{} ESMTP MailCatch", self.hostname))
            .await?;

        let mut buf = Vec::new();

        loop {
            let bytes_read = read_line_capped(&mut reader, &mut buf, MAX_COMMAND_LINE).await?;

            if bytes_read == 0 {
                debug!("Client {} disconnected", self.peer_addr);
                break;
            }

            if bytes_read == MAX_COMMAND_LINE && !buf.ends_with(b"\n") {
                if !skip_line(&mut reader).await? {
                    debug!("Client {} disconnected", self.peer_addr);
                    break;
                }
                self.send_response(&mut writer, 500, "5.5.2 Line too long").await?;
                continue;
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            debug!("SMTP from {}: {}", self.peer_addr, line);

            let (command, args) = parse_command(line);

            match command.to_uppercase().as_str() {
                "HELO" => {
                    state = SessionState::Greeted;
                    envelope.clear();
                    self.send_response(&mut writer, 250, &format!("{} Hello {}", self.hostname, args))
                        .await?;
                }

                "EHLO" => {
                    state = SessionState::Greeted;
                    envelope.clear();

                    let responses = [
                        format!("{} Hello {}", self.hostname, args),
                        format!("SIZE {}", self.max_message_size),
                        "8BITMIME".to_string(),
                        "PIPELINING".to_string(),
                        "ENHANCEDSTATUSCODES".to_string(),
                    ];

                    for (i, resp) in responses.iter().enumerate() {
                        if i == responses.len() - 1 {
                            self.send_response(&mut writer, 250, resp).await?;
                        } else {
                            self.send_response_continue(&mut writer, 250, resp).await?;
                        }
                    }
                }

                "STARTTLS" | "AUTH" => {
                    self.send_response(&mut writer, 502, "5.5.1 Command not implemented")
                        .await?;
                }

                "MAIL" => {
                    if state != SessionState::Greeted {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    match parse_mail_from(args) {
                        Some(sender) => {
                            if declared_size(args).is_some_and(|size| size > self.max_message_size) {
                                self.send_response(
                                    &mut writer,
                                    552,
                                    "5.3.4 Message too large",
                                )
                                .await?;
                                continue;
                            }
                            debug!(
                                "Envelope sender from {}: {}",
                                self.peer_addr,
                                sender.as_deref().unwrap_or("<>")
                            );
                            state = SessionState::MailFrom;
                            self.send_response(&mut writer, 250, "2.1.0 OK").await?;
                        }
                        None => {
                            self.send_response(&mut writer, 501, "5.1.7 Bad sender address syntax")
                                .await?;
                        }
                    }
                }

                "RCPT" => {
                    if state != SessionState::MailFrom && state != SessionState::RcptTo {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    let Some(recipient) = parse_rcpt_to(args) else {
                        self.send_response(&mut writer, 501, "5.1.3 Bad recipient address syntax")
                            .await?;
                        continue;
                    };

                    match self.handler.on_rcpt(&recipient).await {
                        Ok(()) => {
                            let mailbox = self.handler.mailbox_key(&recipient);
                            if !envelope.add(&recipient, mailbox) {
                                debug!(
                                    "Recipient {} shares a mailbox already in the envelope",
                                    recipient
                                );
                            }
                            state = SessionState::RcptTo;
                            self.send_response(&mut writer, 250, "2.1.5 OK").await?;
                        }
                        Err(rejected) => {
                            self.send_response(&mut writer, 550, &format!("5.1.1 {}", rejected))
                                .await?;
                        }
                    }
                }

                "DATA" => {
                    if state != SessionState::RcptTo || envelope.recipients.is_empty() {
                        self.send_response(&mut writer, 503, "5.5.1 Bad sequence of commands")
                            .await?;
                        continue;
                    }

                    self.send_response(&mut writer, 354, "Start mail input; end with <CRLF>.<CRLF>")
                        .await?;

                    let message_id = Uuid::now_v7().simple().to_string();
                    let (sinks, tasks) = self.dispatch(&envelope.recipients, &message_id);
                    let outcome = self.relay_data(&mut reader, &sinks).await?;

                    match outcome {
                        DataOutcome::Complete(size) => {
                            for sink in sinks {
                                sink.finish().await;
                            }
                            if await_all(tasks).await {
                                info!(
                                    "Message {} ({} bytes) accepted from {} for {:?}",
                                    message_id, size, self.peer_addr, envelope.recipients
                                );
                                self.send_response(
                                    &mut writer,
                                    250,
                                    &format!("2.0.0 OK: queued as {}", message_id),
                                )
                                .await?;
                            } else {
                                self.send_response(&mut writer, 451, "4.3.0 Temporary error")
                                    .await?;
                            }
                        }
                        DataOutcome::TooLarge => {
                            for sink in sinks {
                                sink.abort("message exceeds maximum size").await;
                            }
                            await_all(tasks).await;
                            warn!(
                                "Message {} from {} exceeded {} bytes",
                                message_id, self.peer_addr, self.max_message_size
                            );
                            self.send_response(
                                &mut writer,
                                552,
                                "5.3.4 Message too large",
                            )
                            .await?;
                        }
                        DataOutcome::Disconnected => {
                            for sink in sinks {
                                sink.abort("connection closed during DATA").await;
                            }
                            await_all(tasks).await;
                            warn!("Client {} disconnected during DATA", self.peer_addr);
                            return Ok(());
                        }
                    }

                    // Reset state for next message
                    state = SessionState::Greeted;
                    envelope.clear();
                }

                "RSET" => {
                    envelope.clear();
                    if state != SessionState::Connected {
                        state = SessionState::Greeted;
                    }
                    self.send_response(&mut writer, 250, "2.0.0 OK").await?;
                }

                "NOOP" => {
                    self.send_response(&mut writer, 250, "2.0.0 OK").await?;
                }

                "QUIT" => {
                    self.send_response(&mut writer, 221, "2.0.0 Bye").await?;
                    break;
                }

                "VRFY" => {
                    self.send_response(&mut writer, 252, "2.5.2 Cannot VRFY user")
                        .await?;
                }

                _ => {
                    self.send_response(&mut writer, 500, "5.5.2 Command not recognized")
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Start one handler call per recipient, each fed by its own stream
    fn dispatch(&self, recipients: &[String], message_id: &str) -> (Vec<MessageSink>, Vec<JoinHandle<()>>) {
        recipients
            .iter()
            .map(|recipient| {
                let (sink, stream) = message_channel(DEFAULT_STREAM_DEPTH);
                let handler = self.handler.clone();
                let recipient = recipient.clone();
                let message_id = message_id.to_string();
                let task = tokio::spawn(async move {
                    handler.on_message(recipient, message_id, stream).await;
                });
                (sink, task)
            })
            .unzip()
    }

    /// Relay message data up to the terminating `.` line to every sink,
    /// undoing dot-stuffing. Long lines are read in pieces and only the
    /// first piece of a line can carry a leading dot. Once the size limit is
    /// passed the rest of the data is read and discarded so the dialogue
    /// stays in sync.
    async fn relay_data<R: AsyncBufRead + Unpin>(
        &self,
        reader: &mut R,
        sinks: &[MessageSink],
    ) -> Result<DataOutcome> {
        let mut pending = BytesMut::with_capacity(CHUNK_SIZE);
        let mut line = Vec::new();
        let mut size = 0usize;
        let mut too_large = false;
        let mut at_line_start = true;

        loop {
            let bytes_read = read_line_capped(reader, &mut line, MAX_DATA_READ).await?;

            if bytes_read == 0 {
                return Ok(DataOutcome::Disconnected);
            }

            let line_start = at_line_start;
            at_line_start = line.ends_with(b"\n");

            if line_start && (line == b".\r\n" || line == b".\n") {
                break;
            }

            if too_large {
                continue;
            }

            let content = match line.first() {
                Some(b'.') if line_start => &line[1..],
                _ => &line[..],
            };

            size += content.len();
            if size > self.max_message_size {
                too_large = true;
                continue;
            }

            pending.extend_from_slice(content);
            if pending.len() >= CHUNK_SIZE {
                broadcast(sinks, pending.split().freeze()).await;
            }
        }

        if too_large {
            return Ok(DataOutcome::TooLarge);
        }

        if !pending.is_empty() {
            broadcast(sinks, pending.freeze()).await;
        }

        Ok(DataOutcome::Complete(size))
    }

    /// Send an SMTP response
    async fn send_response<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut BufWriter<W>,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{} {}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        debug!("SMTP to {}: {}", self.peer_addr, response.trim());
        Ok(())
    }

    /// Send a multi-line response (intermediate line)
    async fn send_response_continue<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut BufWriter<W>,
        code: u16,
        message: &str,
    ) -> Result<()> {
        let response = format!("{}-{}\r\n", code, message);
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
        debug!("SMTP to {}: {}", self.peer_addr, response.trim());
        Ok(())
    }
}

async fn broadcast(sinks: &[MessageSink], chunk: Bytes) {
    for sink in sinks {
        // A consumer that went away has already recorded its own failure
        let _ = sink.send(chunk.clone()).await;
    }
}

/// Read up to and including `\n`, but never more than `limit` bytes
async fn read_line_capped<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<usize> {
    buf.clear();
    reader.take(limit as u64).read_until(b'\n', buf).await
}

/// Discard the rest of an overlong line; false on end of input
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<bool> {
    let mut scratch = Vec::new();
    loop {
        if read_line_capped(reader, &mut scratch, MAX_COMMAND_LINE).await? == 0 {
            return Ok(false);
        }
        if scratch.ends_with(b"\n") {
            return Ok(true);
        }
    }
}

/// Wait for every recipient task; false if any of them panicked
async fn await_all(tasks: Vec<JoinHandle<()>>) -> bool {
    let mut all_ok = true;
    for task in tasks {
        if let Err(e) = task.await {
            error!("Message handler task failed: {}", e);
            all_ok = false;
        }
    }
    all_ok
}

/// Parse an SMTP command line into command and arguments
fn parse_command(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((command, args)) => (command, args.trim()),
        None => (line, ""),
    }
}

/// Address between angle brackets, or the first bare token
fn extract_path(addr_part: &str) -> Option<&str> {
    let addr_part = addr_part.trim();
    if addr_part.starts_with('<') {
        let end = addr_part.find('>')?;
        Some(&addr_part[1..end])
    } else {
        addr_part.split_whitespace().next()
    }
}

/// Parse MAIL FROM:<address>; `Some(None)` is the null sender
fn parse_mail_from(args: &str) -> Option<Option<String>> {
    let args = args.trim();
    if !args.get(..5)?.eq_ignore_ascii_case("FROM:") {
        return None;
    }

    let email = extract_path(&args[5..])?;
    if email.is_empty() {
        Some(None)
    } else {
        Some(Some(email.to_string()))
    }
}

/// Parse RCPT TO:<address>
fn parse_rcpt_to(args: &str) -> Option<String> {
    let args = args.trim();
    if !args.get(..3)?.eq_ignore_ascii_case("TO:") {
        return None;
    }

    let email = extract_path(&args[3..])?;
    if email.is_empty() || !email.contains('@') {
        return None;
    }
    Some(email.to_string())
}

/// `SIZE=` parameter of a MAIL command
fn declared_size(args: &str) -> Option<usize> {
    args.split_whitespace()
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("SIZE"))
        .and_then(|(_, value)| value.parse().ok())
}
