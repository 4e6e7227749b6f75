//! Readiness via an HTTP GET, success defined as any 2xx response.

use std::time::Duration;

use async_trait::async_trait;
use ignition_core::{CancellationToken, Signal};

pub struct HttpGetSignal {
    name: String,
    url: String,
    stage: u32,
    timeout: Option<Duration>,
    client: reqwest::Client,
}

impl HttpGetSignal {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            stage: 0,
            timeout: None,
            client: reqwest::Client::new(),
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
impl Signal for HttpGetSignal {
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
        let request = self.client.get(&self.url).send();
        let response = tokio::select! {
            _ = ctx.cancelled() => anyhow::bail!("cancelled before GET {}", self.url),
            result = request => result.map_err(|e| anyhow::anyhow!("GET {} failed: {e}", self.url))?,
        };
        if response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!("GET {} returned {}", self.url, response.status())
        }
    }
}
