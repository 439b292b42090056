//! SMTP server implementation

use super::{MailHandler, SmtpSession};
use anyhow::Result;
use mailcatch_common::config::{Config, SmtpConfig};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// SMTP Server
pub struct SmtpServer {
    config: SmtpConfig,
    hostname: String,
    handler: Arc<dyn MailHandler>,
    connection_semaphore: Arc<Semaphore>,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(config: &Config, handler: Arc<dyn MailHandler>) -> Self {
        Self {
            config: config.smtp.clone(),
            hostname: config.server.hostname.clone(),
            handler,
            connection_semaphore: Arc::new(Semaphore::new(config.smtp.max_connections.max(1))),
        }
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("SMTP server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections on `listener` until the task is cancelled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((mut stream, peer_addr)) => {
                    // Acquire semaphore permit
                    let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Max connections reached, rejecting {}", peer_addr);
                            tokio::spawn(async move {
                                let _ = stream
                                    .write_all(b"421 4.3.2 Too many connections, try again later\r\n")
                                    .await;
                            });
                            continue;
                        }
                    };

                    let session = SmtpSession::new(
                        self.hostname.clone(),
                        self.config.max_message_size,
                        self.handler.clone(),
                        peer_addr,
                    );

                    tokio::spawn(async move {
                        if let Err(e) = session.handle(stream).await {
                            error!("SMTP session error from {}: {}", peer_addr, e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Bind and serve
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}
