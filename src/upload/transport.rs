//! Trait abstraction for the upload transport to enable testing.
//!
//! One session is opened per upload attempt and lines are sent one at a time.
//! There is no cancellation of an in-flight call; the TCP implementation bounds
//! connect and every send with a hard timeout instead.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Result, TrackerError};

/// Opens upload sessions to the collector
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects to `host:port`
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn UploadSession>>;
}

/// One connection to the collector
#[async_trait]
pub trait UploadSession: Send {
    /// Sends one line (the caller includes the trailing newline)
    async fn send_line(&mut self, line: &[u8]) -> Result<()>;

    /// Closes the session
    async fn close(&mut self);
}

/// TCP transport with hard connect and send timeouts
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            send_timeout,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn UploadSession>> {
        let stream = timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TrackerError::Transport(format!("connect to {}:{} timed out", host, port)))?
            .map_err(|e| TrackerError::Transport(format!("connect to {}:{} failed: {}", host, port, e)))?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}:{}", host, port);
        Ok(Box::new(TcpSession {
            stream,
            send_timeout: self.send_timeout,
        }))
    }
}

struct TcpSession {
    stream: TcpStream,
    send_timeout: Duration,
}

#[async_trait]
impl UploadSession for TcpSession {
    async fn send_line(&mut self, line: &[u8]) -> Result<()> {
        timeout(self.send_timeout, self.stream.write_all(line))
            .await
            .map_err(|_| TrackerError::Transport("send timed out".to_string()))?
            .map_err(|e| TrackerError::Transport(format!("socket write fail: {}", e)))
    }

    async fn close(&mut self) {
        let _ = timeout(self.send_timeout, self.stream.shutdown()).await;
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Fake transport recording every line it receives
    #[derive(Clone, Default)]
    pub struct MockTransport {
        pub sent: Arc<Mutex<Vec<String>>>,
        pub connects: Arc<Mutex<Vec<(String, u16)>>>,
        /// Fail sending any line starting with this text
        pub fail_on: Arc<Mutex<Option<String>>>,
        pub refuse_connect: Arc<Mutex<bool>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get_sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        pub fn set_fail_on(&self, prefix: &str) {
            *self.fail_on.lock().unwrap() = Some(prefix.to_string());
        }

        pub fn clear_failure(&self) {
            *self.fail_on.lock().unwrap() = None;
        }

        pub fn set_refuse_connect(&self, refuse: bool) {
            *self.refuse_connect.lock().unwrap() = refuse;
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn UploadSession>> {
            if *self.refuse_connect.lock().unwrap() {
                return Err(TrackerError::Transport("Mock connect refused".to_string()));
            }
            self.connects.lock().unwrap().push((host.to_string(), port));
            Ok(Box::new(MockSession {
                transport: self.clone(),
            }))
        }
    }

    struct MockSession {
        transport: MockTransport,
    }

    #[async_trait]
    impl UploadSession for MockSession {
        async fn send_line(&mut self, line: &[u8]) -> Result<()> {
            let text = String::from_utf8_lossy(line).into_owned();
            if let Some(prefix) = self.transport.fail_on.lock().unwrap().as_deref() {
                if text.starts_with(prefix) {
                    return Err(TrackerError::Transport("Mock send error".to_string()));
                }
            }
            self.transport.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn close(&mut self) {}
    }
}
