//! Pre-flight reachability check of the remote SSH port.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::utils::{Result, SyncError};

#[async_trait]
pub trait Reachability: Send + Sync {
    /// `Err(SyncError::Connectivity)` when the port cannot be reached.
    async fn probe(&self, host: &str, port: u16) -> Result<()>;
}

/// Plain TCP connect with a timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Reachability for TcpProbe {
    async fn probe(&self, host: &str, port: u16) -> Result<()> {
        let unreachable = || SyncError::Connectivity {
            host: host.to_string(),
            port,
        };

        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => {
                tracing::debug!(host = %host, port, "SSH port reachable");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::debug!(host = %host, port, error = %e, "SSH port refused connection");
                Err(unreachable())
            }
            Err(_) => {
                tracing::debug!(host = %host, port, timeout = ?self.timeout, "SSH port probe timed out");
                Err(unreachable())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::new(Duration::from_secs(2));
        assert!(probe.probe("127.0.0.1", port).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_closed_port() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let probe = TcpProbe::new(Duration::from_secs(2));
        let err = probe.probe("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, SyncError::Connectivity { port: p, .. } if p == port));
    }
}
