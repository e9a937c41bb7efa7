// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Broker Store Implementations
//!
//! Infrastructure implementations of the `BrokerStore` contract defined in
//! the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve service instances and bindings
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **InMemoryBrokerStore** - lock-protected maps, lost on restart
//! - **FileBrokerStore** - the in-memory maps mirrored to one JSON document
//! - **SqlBrokerStore** - one row per record in Postgres or MySQL

pub mod file;
pub mod sql;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::repository::{BrokerStore, RepositoryError};
use crate::domain::service::{BindDetails, ServiceInstance};

pub use file::FileBrokerStore;
pub use sql::SqlBrokerStore;

/// Full broker state as held in memory and written by the file store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerState {
    #[serde(rename = "InstanceMap", default)]
    pub instance_map: BTreeMap<String, ServiceInstance>,
    #[serde(rename = "BindingMap", default)]
    pub binding_map: BTreeMap<String, BindDetails>,
}

#[derive(Clone, Default)]
pub struct InMemoryBrokerStore {
    state: Arc<RwLock<BrokerState>>,
}

impl InMemoryBrokerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: BrokerState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Point-in-time copy of the whole state
    pub fn snapshot(&self) -> BrokerState {
        self.state.read().clone()
    }
}

#[async_trait]
impl BrokerStore for InMemoryBrokerStore {
    async fn retrieve_instance_details(
        &self,
        id: &str,
    ) -> Result<ServiceInstance, RepositoryError> {
        self.state
            .read()
            .instance_map
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("instance {}", id)))
    }

    async fn retrieve_binding_details(&self, id: &str) -> Result<BindDetails, RepositoryError> {
        self.state
            .read()
            .binding_map
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("binding {}", id)))
    }

    async fn create_instance_details(
        &self,
        id: &str,
        details: &ServiceInstance,
    ) -> Result<(), RepositoryError> {
        self.state
            .write()
            .instance_map
            .insert(id.to_string(), details.clone());
        Ok(())
    }

    async fn create_binding_details(
        &self,
        id: &str,
        details: &BindDetails,
    ) -> Result<(), RepositoryError> {
        self.state
            .write()
            .binding_map
            .insert(id.to_string(), details.redacted());
        Ok(())
    }

    async fn delete_instance_details(&self, id: &str) -> Result<(), RepositoryError> {
        self.state
            .write()
            .instance_map
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("instance {}", id)))
    }

    async fn delete_binding_details(&self, id: &str) -> Result<(), RepositoryError> {
        self.state
            .write()
            .binding_map
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("binding {}", id)))
    }

    async fn save(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}
