//! Readiness via a bare TCP connect, for any dependency that exposes nothing
//! richer than a listening socket.

use std::time::Duration;

use async_trait::async_trait;
use ignition_core::{CancellationToken, Signal};
use tokio::net::TcpStream;

pub struct TcpConnectSignal {
    name: String,
    host: String,
    port: u16,
    stage: u32,
    timeout: Option<Duration>,
}

impl TcpConnectSignal {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            stage: 0,
            timeout: None,
        }
    }

    pub fn with_stage(mut self, stage: u32) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Signal for TcpConnectSignal {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn stage(&self) -> u32 {
        self.stage
    }

    async fn wait(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        tokio::select! {
            _ = ctx.cancelled() => anyhow::bail!("cancelled before connecting to {addr}"),
            result = TcpStream::connect(&addr) => {
                result.map_err(|e| anyhow::anyhow!("tcp connect to {addr} failed: {e}"))?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn succeeds_against_a_listening_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let signal = TcpConnectSignal::new("db", addr.ip().to_string(), addr.port());
        signal.wait(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn fails_against_a_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // nothing listens on `addr` anymore

        let signal = TcpConnectSignal::new("db", addr.ip().to_string(), addr.port());
        let err = signal.wait(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("tcp connect"));
    }
}
