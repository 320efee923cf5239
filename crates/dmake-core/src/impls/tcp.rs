use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::LocalArtifactStore;
use crate::config::{SpaceConfig, WorkerConfig};
use crate::ports::{ArtifactError, ArtifactStore, Connector};
use crate::space::{RemoteSpace, Space, SpaceError};

/// Reaches a driver over TCP and keeps artifacts in a local directory.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    driver: SocketAddr,
    work_dir: PathBuf,
}

impl TcpConnector {
    pub fn new(driver: SocketAddr, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            driver,
            work_dir: work_dir.into(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.driver, config.work_dir.clone())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Arc<dyn Space>, SpaceError> {
        let space = RemoteSpace::connect(self.driver).await?;
        Ok(Arc::new(space))
    }

    async fn open_store(&self, space: Arc<dyn Space>, config: &SpaceConfig) -> Result<Arc<dyn ArtifactStore>, ArtifactError> {
        let store = LocalArtifactStore::open(&self.work_dir, space, config.file_lease()).await?;
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    use crate::space::{InMemorySpace, SpaceServer};

    #[tokio::test]
    async fn refuses_when_nothing_listens() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpConnector::new(addr, ".").connect().await.err().unwrap();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn opens_store_on_remote_space() {
        let local = Arc::new(InMemorySpace::new());
        let server = SpaceServer::bind("127.0.0.1:0".parse().unwrap(), local.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(shutdown.clone()));

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.c"), b"int main;").unwrap();
        let connector = TcpConnector::new(addr, dir.path());
        let space = connector.connect().await.unwrap();
        let store = connector.open_store(space, &SpaceConfig::default()).await.unwrap();

        store.publish("main.c").await.unwrap();
        assert_eq!(local.len().await, 1);
        shutdown.cancel();
    }
}
