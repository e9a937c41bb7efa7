// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Broker Store Interface
//!
//! Persistence contract for the two broker aggregates, service instances and
//! service bindings. The interface lives in the domain layer and is
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Backend | Implementation | Durability |
//! |---------|----------------|------------|
//! | In-memory | `InMemoryBrokerStore` | process lifetime |
//! | File | `FileBrokerStore` | JSON document, written on `save` |
//! | SQL | `SqlBrokerStore` | Postgres or MySQL, written on every mutation |
//!
//! The concrete store is selected at startup from the process flags.

use async_trait::async_trait;

use crate::domain::service::{BindDetails, ServiceInstance};

/// Storage backend selection
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    File(FileStoreConfig),
    Sql(SqlStoreConfig),
}

#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    pub path: std::path::PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFlavor {
    Postgres,
    MySql,
}

impl std::str::FromStr for SqlFlavor {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            other => Err(RepositoryError::Database(format!("Unrecognized driver: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqlStoreConfig {
    pub flavor: SqlFlavor,
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub port: String,
    pub database: String,
    /// Path to a CA certificate; when set the connection requires verified TLS
    pub ca_cert_path: Option<std::path::PathBuf>,
    /// With a CA certificate, verify the chain but not the server hostname
    pub skip_hostname_validation: bool,
}

/// Repository interface for service instances and bindings
#[async_trait]
pub trait BrokerStore: Send + Sync {
    async fn retrieve_instance_details(&self, id: &str) -> Result<ServiceInstance, RepositoryError>;

    async fn retrieve_binding_details(&self, id: &str) -> Result<BindDetails, RepositoryError>;

    /// Insert or replace an instance record.
    async fn create_instance_details(
        &self,
        id: &str,
        details: &ServiceInstance,
    ) -> Result<(), RepositoryError>;

    /// Insert or replace a binding; parameters are redacted before they are written.
    async fn create_binding_details(
        &self,
        id: &str,
        details: &BindDetails,
    ) -> Result<(), RepositoryError>;

    async fn delete_instance_details(&self, id: &str) -> Result<(), RepositoryError>;

    async fn delete_binding_details(&self, id: &str) -> Result<(), RepositoryError>;

    /// Flush pending state. No-op for stores that write through.
    async fn save(&self) -> Result<(), RepositoryError>;

    /// Release connections and other resources.
    async fn cleanup(&self) -> Result<(), RepositoryError>;

    /// An instance with this id exists and holds different details
    async fn is_instance_conflict(&self, id: &str, details: &ServiceInstance) -> bool {
        match self.retrieve_instance_details(id).await {
            Ok(existing) => existing != *details,
            Err(_) => false,
        }
    }

    /// A binding with this id exists and was made with different details
    async fn is_binding_conflict(&self, id: &str, details: &BindDetails) -> bool {
        match self.retrieve_binding_details(id).await {
            Ok(existing) => existing.conflicts_with(details),
            Err(_) => false,
        }
    }
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Io(err.to_string())
    }
}
