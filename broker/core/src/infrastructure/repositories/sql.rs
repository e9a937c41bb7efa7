// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SQL Broker Store
//!
//! Stores each instance and binding as one JSON-encoded row keyed by id.
//! Every mutation is written through, so `save` has nothing to flush.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements SQL-backed broker persistence

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::domain::repository::{BrokerStore, RepositoryError, SqlFlavor};
use crate::domain::service::{BindDetails, ServiceInstance};
use crate::infrastructure::db::Database;

const INSTANCES_TABLE: &str = "service_instances";
const BINDINGS_TABLE: &str = "service_bindings";

pub struct SqlBrokerStore {
    db: Database,
}

impl SqlBrokerStore {
    /// Wrap an open connection and make sure both tables exist.
    pub async fn new(db: Database) -> Result<Self, RepositoryError> {
        for table in [INSTANCES_TABLE, BINDINGS_TABLE] {
            db.execute(&create_table_sql(table), &[]).await.map_err(|e| {
                error!("Failed to create table {}: {}", table, e);
                RepositoryError::Database(format!("Failed to create table {}: {}", table, e))
            })?;
        }
        info!("SQL broker store ready ({:?})", db.flavor());
        Ok(Self { db })
    }

    async fn retrieve<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        id: &str,
    ) -> Result<T, RepositoryError> {
        let sql = format!("SELECT value FROM {} WHERE id = ?", table);
        let value = self
            .db
            .fetch_text(&sql, &[id])
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("{} {}", table, id)))?;
        Ok(serde_json::from_str(&value)?)
    }

    async fn upsert<T: serde::Serialize>(
        &self,
        table: &str,
        id: &str,
        value: &T,
    ) -> Result<(), RepositoryError> {
        let encoded = serde_json::to_string(value)?;
        let sql = upsert_sql(self.db.flavor(), table);
        self.db.execute(&sql, &[id, &encoded]).await?;
        debug!("Stored {} {}", table, id);
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RepositoryError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table);
        let affected = self.db.execute(&sql, &[id]).await?;
        if affected == 0 {
            return Err(RepositoryError::NotFound(format!("{} {}", table, id)));
        }
        Ok(())
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id VARCHAR(255) PRIMARY KEY, value VARCHAR(4096))",
        table
    )
}

fn upsert_sql(flavor: SqlFlavor, table: &str) -> String {
    match flavor {
        SqlFlavor::Postgres => format!(
            "INSERT INTO {} (id, value) VALUES (?, ?) ON CONFLICT (id) DO UPDATE SET value = EXCLUDED.value",
            table
        ),
        SqlFlavor::MySql => format!(
            "INSERT INTO {} (id, value) VALUES (?, ?) ON DUPLICATE KEY UPDATE value = VALUES(value)",
            table
        ),
    }
}

#[async_trait]
impl BrokerStore for SqlBrokerStore {
    async fn retrieve_instance_details(
        &self,
        id: &str,
    ) -> Result<ServiceInstance, RepositoryError> {
        self.retrieve(INSTANCES_TABLE, id).await
    }

    async fn retrieve_binding_details(&self, id: &str) -> Result<BindDetails, RepositoryError> {
        self.retrieve(BINDINGS_TABLE, id).await
    }

    async fn create_instance_details(
        &self,
        id: &str,
        details: &ServiceInstance,
    ) -> Result<(), RepositoryError> {
        self.upsert(INSTANCES_TABLE, id, details).await
    }

    async fn create_binding_details(
        &self,
        id: &str,
        details: &BindDetails,
    ) -> Result<(), RepositoryError> {
        self.upsert(BINDINGS_TABLE, id, &details.redacted()).await
    }

    async fn delete_instance_details(&self, id: &str) -> Result<(), RepositoryError> {
        self.delete(INSTANCES_TABLE, id).await
    }

    async fn delete_binding_details(&self, id: &str) -> Result<(), RepositoryError> {
        self.delete(BINDINGS_TABLE, id).await
    }

    async fn save(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), RepositoryError> {
        self.db.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::flavorify;

    #[test]
    fn test_postgres_upsert_placeholders() {
        let sql = flavorify(SqlFlavor::Postgres, &upsert_sql(SqlFlavor::Postgres, INSTANCES_TABLE));
        assert!(sql.starts_with("INSERT INTO service_instances (id, value) VALUES ($1, $2)"));
        assert!(sql.contains("EXCLUDED.value"));
    }

    #[test]
    fn test_mysql_upsert_keeps_question_marks() {
        let sql = flavorify(SqlFlavor::MySql, &upsert_sql(SqlFlavor::MySql, BINDINGS_TABLE));
        assert!(sql.contains("VALUES (?, ?)"));
        assert!(sql.contains("ON DUPLICATE KEY UPDATE"));
    }

    #[test]
    fn test_table_schema() {
        assert_eq!(
            create_table_sql(BINDINGS_TABLE),
            "CREATE TABLE IF NOT EXISTS service_bindings (id VARCHAR(255) PRIMARY KEY, value VARCHAR(4096))"
        );
    }
}
