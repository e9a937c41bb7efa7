// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Broker configuration from flags and environment
//!
//! Every flag has an environment fallback. Secrets are only read from the
//! environment (`USERNAME`, `PASSWORD`, `DB_USERNAME`, `DB_PASSWORD`). When
//! the broker is pushed as a Cloud Foundry app, database coordinates come
//! from the `VCAP_SERVICES` binding named by `--cf-service-name`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use tracing::debug;

use nfsbroker_core::application::broker::BrokerType;
use nfsbroker_core::domain::mount_mask::{
    BooleanOptionValidator, MountOptionsMask, OptionValidator, SOURCE_KEY,
};
use nfsbroker_core::domain::mount_options::{parse_key_list, parse_option_string, OptionValue};
use nfsbroker_core::domain::repository::{
    FileStoreConfig, SqlFlavor, SqlStoreConfig, StorageBackend,
};
use nfsbroker_core::domain::service::{Catalog, SHARE_KEY};
use nfsbroker_core::infrastructure::repositories::file::STATE_FILE_NAME;
use nfsbroker_core::presentation::api::BrokerCredentials;

/// Mount option policy flags
#[derive(Args, Debug, Clone)]
pub struct MaskArgs {
    /// Comma separated options callers may set
    #[arg(
        long,
        global = true,
        alias = "allowedOptions",
        env = "NFSBROKER_ALLOWED_OPTIONS",
        default_value = "auto_cache,uid,gid"
    )]
    pub allowed_options: String,

    /// Comma separated param:value defaults. A default whose key is not
    /// allowed becomes a fixed value callers cannot override
    #[arg(
        long,
        global = true,
        alias = "defaultOptions",
        env = "NFSBROKER_DEFAULT_OPTIONS",
        default_value = "auto_cache:true"
    )]
    pub default_options: String,

    /// Comma separated options that are silently dropped
    #[arg(long, global = true, env = "NFSBROKER_IGNORED_OPTIONS", default_value = "mount")]
    pub ignored_options: String,

    /// Comma separated options every resolved configuration must contain
    #[arg(long, global = true, env = "NFSBROKER_MANDATORY_OPTIONS", default_value = "source")]
    pub mandatory_options: String,

    /// Comma separated options whose values must parse as booleans
    #[arg(long, global = true, env = "NFSBROKER_BOOLEAN_OPTIONS", default_value = "")]
    pub boolean_options: String,
}

impl MaskArgs {
    /// Build the immutable mask shared by every bind.
    pub fn build_mask(&self) -> Result<MountOptionsMask> {
        let mut allowed = parse_key_list(&self.allowed_options);
        if !allowed.iter().any(|k| k == SOURCE_KEY) {
            allowed.push(SOURCE_KEY.to_string());
        }

        let defaults: BTreeMap<String, OptionValue> =
            parse_option_string(&self.default_options, ':')
                .into_iter()
                .map(|(k, v)| (k, OptionValue::String(v)))
                .collect();

        let key_perms = BTreeMap::from([
            ("readonly".to_string(), "ro".to_string()),
            (SHARE_KEY.to_string(), SOURCE_KEY.to_string()),
        ]);

        let booleans = BooleanOptionValidator::new(parse_key_list(&self.boolean_options));
        let validator: Option<Arc<dyn OptionValidator>> = if booleans.is_empty() {
            None
        } else {
            Some(Arc::new(booleans))
        };

        let mask = MountOptionsMask::new(
            allowed,
            defaults,
            key_perms,
            parse_key_list(&self.ignored_options),
            parse_key_list(&self.mandatory_options),
            validator,
        )
        .context("Invalid default options")?;

        debug!("Mount options mask: {:?}", mask);
        Ok(mask)
    }
}

/// Flags for `nfsbroker serve`
#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    /// host:port to serve the service broker API on
    #[arg(
        long,
        alias = "listenAddr",
        env = "NFSBROKER_LISTEN_ADDR",
        default_value = "0.0.0.0:8999"
    )]
    pub listen_addr: String,

    /// Directory the file store keeps broker state in
    #[arg(long, alias = "dataDir", env = "NFSBROKER_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Services config (JSON array) advertised in the catalog
    #[arg(long, alias = "servicesConfig", env = "NFSBROKER_SERVICES_CONFIG", value_name = "FILE")]
    pub services_config: Option<PathBuf>,

    /// Broker flavor: nfs or smb
    #[arg(long, env = "NFSBROKER_TYPE", default_value = "nfs")]
    pub broker_type: BrokerType,

    /// SQL driver (postgres or mysql); selects the SQL store
    #[arg(long, alias = "dbDriver", env = "NFSBROKER_DB_DRIVER")]
    pub db_driver: Option<String>,

    #[arg(long, alias = "dbHostname", env = "NFSBROKER_DB_HOSTNAME", default_value = "")]
    pub db_hostname: String,

    #[arg(long, alias = "dbPort", env = "NFSBROKER_DB_PORT", default_value = "")]
    pub db_port: String,

    #[arg(long, alias = "dbName", env = "NFSBROKER_DB_NAME", default_value = "")]
    pub db_name: String,

    /// CA certificate for TLS database connections
    #[arg(long, alias = "dbCACertPath", env = "NFSBROKER_DB_CA_CERT_PATH", value_name = "FILE")]
    pub db_ca_cert_path: Option<PathBuf>,

    /// Verify the database certificate chain but not its hostname
    #[arg(long, alias = "dbSkipHostnameValidation", env = "NFSBROKER_DB_SKIP_HOSTNAME_VALIDATION")]
    pub db_skip_hostname_validation: bool,

    /// VCAP_SERVICES entry holding database credentials (CF pushed brokers)
    #[arg(long, alias = "cfServiceName", env = "NFSBROKER_CF_SERVICE_NAME")]
    pub cf_service_name: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "NFSBROKER_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    #[arg(long, env = "USERNAME", hide_env_values = true, default_value = "")]
    pub username: String,

    #[arg(long, env = "PASSWORD", hide_env_values = true, default_value = "")]
    pub password: String,

    #[arg(long, env = "DB_USERNAME", hide_env_values = true, default_value = "")]
    pub db_username: String,

    #[arg(long, env = "DB_PASSWORD", hide_env_values = true, default_value = "")]
    pub db_password: String,
}

impl BrokerArgs {
    /// Reject flag combinations the broker cannot start with.
    pub fn check_params(&self) -> Result<()> {
        if self.data_dir.is_none() && self.db_driver.is_none() {
            bail!("Either --data-dir or --db-driver must be provided");
        }
        if self.services_config.is_none() {
            bail!("--services-config must be provided");
        }
        if self.cf_service_name.is_some() && self.db_driver.is_none() {
            bail!("--db-driver is required for a CF deployed broker");
        }
        Ok(())
    }

    pub fn credentials(&self) -> Result<BrokerCredentials> {
        if self.username.is_empty() || self.password.is_empty() {
            bail!("USERNAME and PASSWORD must be set");
        }
        Ok(BrokerCredentials {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }

    pub fn load_catalog(&self) -> Result<Catalog> {
        let path = self
            .services_config
            .as_ref()
            .ok_or_else(|| anyhow!("--services-config must be provided"))?;
        Catalog::from_json_file(path)
            .with_context(|| format!("Failed to load services config from {:?}", path))
    }

    /// Pick the store: SQL when a driver is configured, else the state file
    /// in the data directory. `vcap_services` is the raw environment value.
    pub fn storage_backend(&self, vcap_services: Option<&str>) -> Result<StorageBackend> {
        let Some(driver) = &self.db_driver else {
            let dir = self
                .data_dir
                .as_ref()
                .ok_or_else(|| anyhow!("Either --data-dir or --db-driver must be provided"))?;
            return Ok(StorageBackend::File(FileStoreConfig {
                path: dir.join(STATE_FILE_NAME),
            }));
        };

        let flavor = driver
            .parse::<SqlFlavor>()
            .with_context(|| format!("Unsupported --db-driver {:?}", driver))?;

        let mut config = SqlStoreConfig {
            flavor,
            username: self.db_username.clone(),
            password: self.db_password.clone(),
            hostname: self.db_hostname.clone(),
            port: self.db_port.clone(),
            database: self.db_name.clone(),
            ca_cert_path: self.db_ca_cert_path.clone(),
            skip_hostname_validation: self.db_skip_hostname_validation,
        };

        if let Some(service_name) = &self.cf_service_name {
            let raw = vcap_services.ok_or_else(|| anyhow!("missing VCAP_SERVICES environment"))?;
            let creds = parse_vcap_services(raw, service_name)?;
            config.username = creds.username;
            config.password = creds.password;
            config.hostname = creds.hostname;
            config.port = creds.port;
            config.database = creds.name;
        }

        if let Some(ca) = &config.ca_cert_path {
            if !ca.is_file() {
                bail!("Cannot read database CA certificate {:?}", ca);
            }
        }

        Ok(StorageBackend::Sql(config))
    }
}

/// Database coordinates taken from a VCAP_SERVICES binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub port: String,
    pub name: String,
}

pub fn parse_vcap_services(raw: &str, service_name: &str) -> Result<DbCredentials> {
    let services: serde_json::Value =
        serde_json::from_str(raw).context("VCAP_SERVICES is not valid JSON")?;

    let credentials = services
        .get(service_name)
        .and_then(|bindings| bindings.get(0))
        .and_then(|binding| binding.get("credentials"))
        .and_then(|c| c.as_object())
        .ok_or_else(|| anyhow!("VCAP_SERVICES missing specified db service {:?}", service_name))?;

    let field = |aliases: &[&str]| -> Result<String> {
        let value = aliases
            .iter()
            .find_map(|k| credentials.get(*k))
            .ok_or_else(|| anyhow!("VCAP_SERVICES credentials missing {}", aliases[0]))?;
        match value {
            serde_json::Value::String(s) => Ok(s.clone()),
            serde_json::Value::Number(n) => Ok(n
                .as_u64()
                .map(|p| p.to_string())
                .unwrap_or_else(|| n.to_string())),
            other => Err(anyhow!(
                "VCAP_SERVICES credential {} has unexpected value {}",
                aliases[0],
                other
            )),
        }
    };

    Ok(DbCredentials {
        username: field(&["user", "username"])?,
        password: field(&["pass", "password"])?,
        hostname: field(&["host", "hostname"])?,
        port: field(&["port"])?,
        name: field(&["name", "db_name"])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        broker: BrokerArgs,
        #[command(flatten)]
        mask: MaskArgs,
    }

    fn parse(args: &[&str]) -> TestCli {
        TestCli::try_parse_from(std::iter::once("nfsbroker").chain(args.iter().copied())).unwrap()
    }

    const VCAP: &str = r#"{
        "broker-db": [{
            "name": "broker-db",
            "credentials": {"username": "dbuser", "password": "dbpass", "hostname": "db.internal", "port": 3306, "name": "brokerdb"}
        }]
    }"#;

    #[test]
    fn test_check_params() {
        assert!(parse(&[]).broker.check_params().is_err());
        assert!(parse(&["--data-dir", "/tmp"]).broker.check_params().is_err());
        assert!(parse(&["--data-dir", "/tmp", "--services-config", "s.json"])
            .broker
            .check_params()
            .is_ok());
        assert!(parse(&["--dbDriver", "mysql", "--servicesConfig", "s.json"])
            .broker
            .check_params()
            .is_ok());
    }

    #[test]
    fn test_file_backend_from_data_dir() {
        let cli = parse(&["--data-dir", "/var/vcap/store", "--services-config", "s.json"]);
        match cli.broker.storage_backend(None).unwrap() {
            StorageBackend::File(config) => {
                assert_eq!(config.path, PathBuf::from("/var/vcap/store/nfs-services.json"))
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_sql_backend_from_vcap_services() {
        let cli = parse(&[
            "--db-driver",
            "mysql",
            "--cf-service-name",
            "broker-db",
            "--services-config",
            "s.json",
        ]);
        match cli.broker.storage_backend(Some(VCAP)).unwrap() {
            StorageBackend::Sql(config) => {
                assert_eq!(config.flavor, SqlFlavor::MySql);
                assert_eq!(config.username, "dbuser");
                assert_eq!(config.hostname, "db.internal");
                assert_eq!(config.port, "3306");
                assert_eq!(config.database, "brokerdb");
            }
            other => panic!("unexpected backend {:?}", other),
        }

        assert!(cli.broker.storage_backend(None).is_err());
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let cli = parse(&["--db-driver", "oracle", "--services-config", "s.json"]);
        assert!(cli.broker.storage_backend(None).is_err());
    }

    #[test]
    fn test_vcap_aliases() {
        let raw = r#"{"db": [{"credentials": {"user": "u", "pass": "p", "host": "h", "port": "5432", "db_name": "d"}}]}"#;
        let creds = parse_vcap_services(raw, "db").unwrap();
        assert_eq!(
            creds,
            DbCredentials {
                username: "u".to_string(),
                password: "p".to_string(),
                hostname: "h".to_string(),
                port: "5432".to_string(),
                name: "d".to_string(),
            }
        );
        assert!(parse_vcap_services(raw, "other").is_err());
    }

    #[test]
    fn test_default_mask() {
        let mask = parse(&[]).mask.build_mask().unwrap();
        assert_eq!(mask.allowed(), ["auto_cache", "uid", "gid", "source"]);
        assert_eq!(mask.mandatory(), ["source"]);
        assert_eq!(mask.ignored(), ["mount"]);

        let raw = BTreeMap::from([
            ("share".to_string(), OptionValue::from("server/export")),
            ("uid".to_string(), OptionValue::from("1000")),
        ]);
        let resolved = mask.resolve(&raw).unwrap();
        assert_eq!(resolved["source"], "server/export");
        assert_eq!(resolved["auto_cache"], "true");
    }

    #[test]
    fn test_boolean_options_validated() {
        let mask = parse(&["--allowed-options", "cache", "--boolean-options", "cache"])
            .mask
            .build_mask()
            .unwrap();
        let raw = BTreeMap::from([
            ("share".to_string(), OptionValue::from("server/export")),
            ("cache".to_string(), OptionValue::from("often")),
        ]);
        assert!(mask.resolve(&raw).is_err());
    }

    #[test]
    fn test_invalid_sloppy_mount_default() {
        let cli = parse(&["--default-options", "sloppy_mount:maybe"]);
        assert!(cli.mask.build_mask().is_err());
    }

    #[test]
    fn test_credentials_required() {
        let mut cli = parse(&[]);
        cli.broker.username.clear();
        assert!(cli.broker.credentials().is_err());
        cli.broker.username = "admin".to_string();
        cli.broker.password = "secret".to_string();
        assert_eq!(cli.broker.credentials().unwrap().username, "admin");
    }
}
