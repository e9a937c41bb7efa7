// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete broker store for the configured storage backend,
//! keeping the domain layer free of infrastructure dependencies.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select and open the broker store at startup

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::domain::repository::{BrokerStore, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{FileBrokerStore, InMemoryBrokerStore, SqlBrokerStore};

/// Opens a BrokerStore implementation based on the configured backend
pub async fn create_broker_store(backend: &StorageBackend) -> Result<Arc<dyn BrokerStore>> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory broker store");
            Ok(Arc::new(InMemoryBrokerStore::new()))
        }
        StorageBackend::File(config) => {
            info!("Using file broker store at {:?}", config.path);
            let store = FileBrokerStore::open(&config.path)
                .await
                .with_context(|| format!("Failed to open state file {:?}", config.path))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Sql(config) => {
            let db = Database::connect(config).await?;
            let store = SqlBrokerStore::new(db)
                .await
                .context("Failed to initialise SQL broker store")?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::FileStoreConfig;
    use crate::domain::service::ServiceInstance;

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = StorageBackend::File(FileStoreConfig {
            path: dir.path().join("nfs-services.json"),
        });

        let store = create_broker_store(&backend).await.unwrap();
        let instance = ServiceInstance {
            service_id: "svc".to_string(),
            plan_id: "Existing".to_string(),
            organization_guid: "org".to_string(),
            space_guid: "space".to_string(),
            service_fingerprint: serde_json::json!({"share": "server/export"}),
        };
        store.create_instance_details("i-1", &instance).await.unwrap();
        store.save().await.unwrap();

        let reopened = create_broker_store(&backend).await.unwrap();
        assert_eq!(reopened.retrieve_instance_details("i-1").await.unwrap(), instance);
    }

    #[tokio::test]
    async fn test_in_memory_backend() {
        let store = create_broker_store(&StorageBackend::InMemory).await.unwrap();
        assert!(store.retrieve_binding_details("b-1").await.is_err());
    }
}
