//! Async view of the metadata / status bus.

use std::path::PathBuf;

use async_trait::async_trait;
use stoker_core::{store, GatewayStatus, GitAuthSpec, Metadata, Profile, StoreError};

use crate::error::BusError;

/// Desired state in, observed state out.
#[async_trait]
pub trait StatusBus: Send + Sync {
    async fn read_metadata(&self) -> Result<Metadata, BusError>;
    async fn read_profile(&self) -> Result<Profile, BusError>;
    async fn read_git_auth(&self) -> Result<Option<GitAuthSpec>, BusError>;
    async fn write_status(&self, gateway: &str, status: &GatewayStatus) -> Result<(), BusError>;
}

/// [`StatusBus`] over a mounted bus directory. Each call runs on the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct FileBus {
    root: PathBuf,
}

impl FileBus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, BusError>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T, StoreError> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || f(root))
            .await
            .map_err(|err| BusError::Join(err.to_string()))?
            .map_err(BusError::from)
    }
}

#[async_trait]
impl StatusBus for FileBus {
    async fn read_metadata(&self) -> Result<Metadata, BusError> {
        self.blocking(|root| store::load_metadata_at(&root)).await
    }

    async fn read_profile(&self) -> Result<Profile, BusError> {
        self.blocking(|root| store::load_profile_at(&root)).await
    }

    async fn read_git_auth(&self) -> Result<Option<GitAuthSpec>, BusError> {
        self.blocking(|root| store::load_git_auth_at(&root)).await
    }

    async fn write_status(&self, gateway: &str, status: &GatewayStatus) -> Result<(), BusError> {
        let gateway = gateway.to_string();
        let status = status.clone();
        self.blocking(move |root| store::save_status_at(&root, &gateway, &status))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoker_core::SyncStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_metadata_is_an_error() {
        let dir = TempDir::new().unwrap();
        let bus = FileBus::new(dir.path());
        let err = bus.read_metadata().await.unwrap_err();
        assert!(matches!(
            err,
            BusError::Store(StoreError::MetadataNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn status_written_through_store() {
        let dir = TempDir::new().unwrap();
        let bus = FileBus::new(dir.path());
        bus.write_status("gw", &GatewayStatus::pending("main", "0.1.0"))
            .await
            .unwrap();

        let back = store::load_status_at(dir.path(), "gw").unwrap().unwrap();
        assert_eq!(back.sync_status, SyncStatus::Pending);
    }
}
