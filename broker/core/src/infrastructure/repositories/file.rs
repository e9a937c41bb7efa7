// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! File Broker Store
//!
//! Keeps the broker state in memory and serialises all of it to a single JSON
//! document on `save`. The document is restored when the store is opened.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements file-backed broker persistence

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{error, info};

use super::{BrokerState, InMemoryBrokerStore};
use crate::domain::repository::{BrokerStore, RepositoryError};
use crate::domain::service::{BindDetails, ServiceInstance};

/// State file name inside the data directory
pub const STATE_FILE_NAME: &str = "nfs-services.json";

pub struct FileBrokerStore {
    path: PathBuf,
    inner: InMemoryBrokerStore,
}

impl FileBrokerStore {
    /// Open the store, restoring any previously saved state. A missing file
    /// yields an empty state; an unreadable one is an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let state = restore(&path).await?;

        Ok(Self {
            path,
            inner: InMemoryBrokerStore::with_state(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn restore(path: &Path) -> Result<BrokerState, RepositoryError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No state file at {:?}, starting with empty state", path);
            return Ok(BrokerState::default());
        }
        Err(e) => {
            error!("Failed to read state file {:?}: {}", path, e);
            return Err(e.into());
        }
    };

    let state: BrokerState = serde_json::from_slice(&data).map_err(|e| {
        error!("Failed to parse state file {:?}: {}", path, e);
        RepositoryError::Serialization(format!("{}: {}", path.display(), e))
    })?;

    info!(
        "State restored from {:?} ({} instances, {} bindings)",
        path,
        state.instance_map.len(),
        state.binding_map.len()
    );
    Ok(state)
}

#[async_trait]
impl BrokerStore for FileBrokerStore {
    async fn retrieve_instance_details(
        &self,
        id: &str,
    ) -> Result<ServiceInstance, RepositoryError> {
        self.inner.retrieve_instance_details(id).await
    }

    async fn retrieve_binding_details(&self, id: &str) -> Result<BindDetails, RepositoryError> {
        self.inner.retrieve_binding_details(id).await
    }

    async fn create_instance_details(
        &self,
        id: &str,
        details: &ServiceInstance,
    ) -> Result<(), RepositoryError> {
        self.inner.create_instance_details(id, details).await
    }

    async fn create_binding_details(
        &self,
        id: &str,
        details: &BindDetails,
    ) -> Result<(), RepositoryError> {
        self.inner.create_binding_details(id, details).await
    }

    async fn delete_instance_details(&self, id: &str) -> Result<(), RepositoryError> {
        self.inner.delete_instance_details(id).await
    }

    async fn delete_binding_details(&self, id: &str) -> Result<(), RepositoryError> {
        self.inner.delete_binding_details(id).await
    }

    async fn save(&self) -> Result<(), RepositoryError> {
        let data = serde_json::to_vec(&self.inner.snapshot())?;

        // write-then-rename so a crash never leaves a truncated document
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await.map_err(|e| {
            error!("Failed to write state file {:?}: {}", tmp, e);
            RepositoryError::from(e)
        })?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!("State saved to {:?}", self.path);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
