// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQL Connection Pool
//!
//! Wraps either a Postgres or a MySQL `sqlx` pool in a `Database` handle that
//! the SQL broker store runs its queries through. Statements are written with
//! `?` placeholders and rewritten for Postgres by [`flavorify`].

use anyhow::{Context, Result};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::Row;
use tracing::info;

use crate::domain::repository::{SqlFlavor, SqlStoreConfig};

const MAX_CONNECTIONS: u32 = 5;

#[derive(Clone)]
pub enum Database {
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl Database {
    pub async fn connect(config: &SqlStoreConfig) -> Result<Self> {
        let port: u16 = config
            .port
            .parse()
            .with_context(|| format!("Invalid database port: {:?}", config.port))?;

        info!(
            "Connecting to {:?} database {} at {}:{}",
            config.flavor, config.database, config.hostname, port
        );

        let db = match config.flavor {
            SqlFlavor::Postgres => {
                let mut options = PgConnectOptions::new()
                    .host(&config.hostname)
                    .port(port)
                    .username(&config.username)
                    .password(&config.password)
                    .database(&config.database);
                if let Some(ca) = &config.ca_cert_path {
                    let mode = if config.skip_hostname_validation {
                        PgSslMode::VerifyCa
                    } else {
                        PgSslMode::VerifyFull
                    };
                    options = options.ssl_mode(mode).ssl_root_cert(ca);
                }
                let pool = PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .connect_with(options)
                    .await
                    .context("Failed to connect to postgres")?;
                Database::Postgres(pool)
            }
            SqlFlavor::MySql => {
                let mut options = MySqlConnectOptions::new()
                    .host(&config.hostname)
                    .port(port)
                    .username(&config.username)
                    .password(&config.password)
                    .database(&config.database);
                if let Some(ca) = &config.ca_cert_path {
                    let mode = if config.skip_hostname_validation {
                        MySqlSslMode::VerifyCa
                    } else {
                        MySqlSslMode::VerifyIdentity
                    };
                    options = options.ssl_mode(mode).ssl_ca(ca);
                }
                let pool = MySqlPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .connect_with(options)
                    .await
                    .context("Failed to connect to mysql")?;
                Database::MySql(pool)
            }
        };

        Ok(db)
    }

    pub fn flavor(&self) -> SqlFlavor {
        match self {
            Database::Postgres(_) => SqlFlavor::Postgres,
            Database::MySql(_) => SqlFlavor::MySql,
        }
    }

    /// Run a statement binding each string argument in order.
    pub async fn execute(&self, query: &str, args: &[&str]) -> Result<u64, sqlx::Error> {
        let query = flavorify(self.flavor(), query);
        match self {
            Database::Postgres(pool) => {
                let mut q = sqlx::query(&query);
                for arg in args {
                    q = q.bind(*arg);
                }
                Ok(q.execute(pool).await?.rows_affected())
            }
            Database::MySql(pool) => {
                let mut q = sqlx::query(&query);
                for arg in args {
                    q = q.bind(*arg);
                }
                Ok(q.execute(pool).await?.rows_affected())
            }
        }
    }

    /// Fetch the first text column of the first row, if any.
    pub async fn fetch_text(
        &self,
        query: &str,
        args: &[&str],
    ) -> Result<Option<String>, sqlx::Error> {
        let query = flavorify(self.flavor(), query);
        match self {
            Database::Postgres(pool) => {
                let mut q = sqlx::query(&query);
                for arg in args {
                    q = q.bind(*arg);
                }
                let row = q.fetch_optional(pool).await?;
                row.map(|r| r.try_get::<String, _>(0)).transpose()
            }
            Database::MySql(pool) => {
                let mut q = sqlx::query(&query);
                for arg in args {
                    q = q.bind(*arg);
                }
                let row = q.fetch_optional(pool).await?;
                row.map(|r| r.try_get::<String, _>(0)).transpose()
            }
        }
    }

    pub async fn close(&self) {
        match self {
            Database::Postgres(pool) => pool.close().await,
            Database::MySql(pool) => pool.close().await,
        }
    }
}

/// Rewrite `?` placeholders as `$1, $2, ...` for Postgres. Question marks
/// inside single-quoted literals are left alone.
pub fn flavorify(flavor: SqlFlavor, query: &str) -> String {
    if flavor != SqlFlavor::Postgres {
        return query.to_string();
    }

    let mut out = String::with_capacity(query.len() + 8);
    let mut n = 0;
    let mut in_literal = false;
    for c in query.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '?' if !in_literal => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}
