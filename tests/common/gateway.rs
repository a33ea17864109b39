//! In-process gateway around a [`MockBackend`].

use super::MockBackend;
use slackirc::Gateway;
use slackirc::config::{Config, Credentials, Secret};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TestGateway {
    pub addr: SocketAddr,
    pub backend: Arc<MockBackend>,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

/// Loopback, ephemeral port, fast reconnects.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.listen.address = "127.0.0.1:0".parse().unwrap();
    config.reconnect.initial_backoff_ms = 10;
    config.reconnect.max_backoff_secs = 1;
    config.reconnect.max_attempts = 3;
    config
}

impl TestGateway {
    pub async fn start(backend: MockBackend) -> anyhow::Result<Self> {
        Self::start_with(backend, test_config()).await
    }

    pub async fn start_with(backend: MockBackend, config: Config) -> anyhow::Result<Self> {
        let backend = Arc::new(backend);
        let credentials = Credentials {
            token: Secret::new("xoxp-test"),
            cookie: None,
        };
        let gateway = Gateway::bind(config, credentials, backend.clone()).await?;
        let addr = gateway.local_addr()?;
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(gateway.run(shutdown.clone()));
        Ok(Self {
            addr,
            backend,
            shutdown,
            task,
        })
    }

    /// Wait for the gateway to stop on its own.
    pub async fn finished(self) -> anyhow::Result<()> {
        tokio::time::timeout(Duration::from_secs(10), self.task).await??
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.finished().await
    }
}
