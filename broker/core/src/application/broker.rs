// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Broker Application Service
//!
//! Implements the service broker lifecycle for pre-existing NFS and SMB
//! shares, coordinating:
//! - Domain layer: `MountOptionsMask` resolution, instance and binding records
//! - Infrastructure layer: the configured `BrokerStore`
//!
//! Every mutating operation runs under one coarse async mutex and flushes the
//! store before returning, whether or not the operation itself succeeded.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::domain::mount_mask::{MountOptionsMask, SOURCE_KEY};
use crate::domain::mount_options::{uniform_key_data, MountOptionsError, OptionValue};
use crate::domain::repository::{BrokerStore, RepositoryError};
use crate::domain::service::{
    BindDetails, Binding, Catalog, ServiceInstance, SharedDevice, VolumeMount, SHARE_KEY,
};

/// Parent of the per-instance container mount point
pub const DEFAULT_CONTAINER_PATH: &str = "/var/vcap/data";

/// Bind parameter naming an explicit container mount point
pub const MOUNT_KEY: &str = "mount";

/// Bind parameter selecting a read-only mount
pub const READONLY_KEY: &str = "readonly";

const DEVICE_TYPE_SHARED: &str = "shared";
const UPDATE_NOT_SUPPORTED: &str = "This service does not support instance updates. Please delete your service instance and create a new one with updated configuration.";

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerType {
    Nfs,
    Smb,
}

impl BrokerType {
    pub fn driver_name(&self) -> &'static str {
        match self {
            BrokerType::Nfs => "nfsv3driver",
            BrokerType::Smb => "smbdriver",
        }
    }
}

impl FromStr for BrokerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nfs" => Ok(BrokerType::Nfs),
            "smb" => Ok(BrokerType::Smb),
            other => Err(format!("unknown broker type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionDetails {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub organization_guid: String,
    #[serde(default)]
    pub space_guid: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionedService {
    /// The same instance was already provisioned with identical details
    pub already_existed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeprovisionedService {
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindOutcome {
    pub binding: Binding,
    /// The same binding was already made with identical details
    pub already_existed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSpec {
    pub service_id: String,
    pub plan_id: String,
    pub parameters: serde_json::Value,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("instance already exists")]
    InstanceAlreadyExists,

    #[error("binding already exists")]
    BindingAlreadyExists,

    #[error("instance does not exist")]
    InstanceDoesNotExist,

    #[error("instance does not exist")]
    InstanceGone,

    #[error("binding does not exist")]
    BindingGone,

    #[error("The format of the parameters is not valid JSON")]
    RawParamsInvalid,

    #[error("app_guid is a required field but was not provided")]
    AppGuidNotProvided,

    #[error("bind configuration contains the following invalid option: ['{0}']")]
    BindOverride(String),

    #[error("{0}")]
    InvalidConfiguration(String),

    #[error("Invalid ro parameter value: {0:?}")]
    InvalidReadOnly(String),

    #[error(transparent)]
    MountOptions(#[from] MountOptionsError),

    #[error("{}", UPDATE_NOT_SUPPORTED)]
    UpdateNotSupported,

    #[error("unrecognized operationData")]
    UnrecognizedOperation,

    #[error("store error: {0}")]
    Store(#[from] RepositoryError),

    #[error("{0}")]
    Internal(String),
}

impl BrokerError {
    /// Short machine-readable code reported alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::InstanceAlreadyExists | BrokerError::BindingAlreadyExists => {
                "already-exists"
            }
            BrokerError::InstanceDoesNotExist | BrokerError::InstanceGone => "instance-missing",
            BrokerError::BindingGone => "binding-missing",
            BrokerError::RawParamsInvalid | BrokerError::BindOverride(_) => "invalid-raw-params",
            BrokerError::AppGuidNotProvided => "app-guid-missing",
            BrokerError::InvalidConfiguration(_) => "invalid-configuration",
            BrokerError::InvalidReadOnly(_) => "invalid-ro-param",
            BrokerError::MountOptions(_) => "invalid-mount-options",
            BrokerError::UpdateNotSupported => "update-not-supported",
            BrokerError::UnrecognizedOperation => "unrecognized-operation",
            BrokerError::Store(_) | BrokerError::Internal(_) => "internal-error",
        }
    }
}

// ============================================================================
// Service Trait
// ============================================================================

#[async_trait]
pub trait BrokerService: Send + Sync {
    /// Catalog advertised to the platform
    fn services(&self) -> &Catalog;

    async fn provision(
        &self,
        instance_id: &str,
        details: ProvisionDetails,
    ) -> Result<ProvisionedService, BrokerError>;

    async fn deprovision(&self, instance_id: &str) -> Result<DeprovisionedService, BrokerError>;

    async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: BindDetails,
    ) -> Result<BindOutcome, BrokerError>;

    async fn unbind(&self, instance_id: &str, binding_id: &str) -> Result<(), BrokerError>;

    /// Instance updates are never supported
    async fn update(&self, instance_id: &str) -> Result<(), BrokerError>;

    /// All operations are synchronous, so there is never an operation to poll
    async fn last_operation(&self, instance_id: &str, operation: &str) -> Result<(), BrokerError>;

    async fn get_instance(&self, instance_id: &str) -> Result<InstanceSpec, BrokerError>;
}

// ============================================================================
// Standard Implementation
// ============================================================================

pub struct StandardBrokerService {
    broker_type: BrokerType,
    catalog: Catalog,
    store: Arc<dyn BrokerStore>,
    mask: Arc<MountOptionsMask>,
    lock: Mutex<()>,
    server_colon: Regex,
}

impl StandardBrokerService {
    pub fn new(
        broker_type: BrokerType,
        catalog: Catalog,
        store: Arc<dyn BrokerStore>,
        mask: Arc<MountOptionsMask>,
    ) -> Result<Self, BrokerError> {
        let server_colon =
            Regex::new("^[^/]+:/").map_err(|e| BrokerError::Internal(e.to_string()))?;

        Ok(Self {
            broker_type,
            catalog,
            store,
            mask,
            lock: Mutex::new(()),
            server_colon,
        })
    }

    pub fn broker_type(&self) -> BrokerType {
        self.broker_type
    }

    /// Flush the store after a mutation. A save failure only surfaces when
    /// the operation itself succeeded.
    async fn finish<T>(
        &self,
        op: &'static str,
        result: Result<T, BrokerError>,
    ) -> Result<T, BrokerError> {
        let saved = self.store.save().await;
        let result = match (result, saved) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => {
                error!("Failed to save broker state after {}: {}", op, e);
                Err(BrokerError::Store(e))
            }
            (Err(e), _) => Err(e),
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.code(),
        };
        metrics::counter!("nfsbroker_operations_total", "operation" => op, "outcome" => outcome)
            .increment(1);
        result
    }

    fn validate_share(
        &self,
        configuration: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), BrokerError> {
        let share = configuration
            .get(SHARE_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if share.is_empty() {
            return Err(BrokerError::InvalidConfiguration(
                "config requires a \"share\" key".to_string(),
            ));
        }

        if configuration.contains_key(SOURCE_KEY) {
            return Err(BrokerError::InvalidConfiguration(format!(
                "create configuration contains the following invalid option: ['{}']",
                SOURCE_KEY
            )));
        }

        if self.broker_type == BrokerType::Nfs && self.server_colon.is_match(share) {
            return Err(BrokerError::InvalidConfiguration(
                "syntax error for share: no colon allowed after server".to_string(),
            ));
        }

        Ok(())
    }

    async fn provision_locked(
        &self,
        instance_id: &str,
        details: ProvisionDetails,
    ) -> Result<ProvisionedService, BrokerError> {
        let configuration = match details.parameters {
            Some(serde_json::Value::Object(map)) => map,
            _ => return Err(BrokerError::RawParamsInvalid),
        };
        self.validate_share(&configuration)?;

        let instance = ServiceInstance {
            service_id: details.service_id,
            plan_id: details.plan_id,
            organization_guid: details.organization_guid,
            space_guid: details.space_guid,
            service_fingerprint: serde_json::Value::Object(configuration),
        };

        if self.store.is_instance_conflict(instance_id, &instance).await {
            warn!("Instance {} already exists with different details", instance_id);
            return Err(BrokerError::InstanceAlreadyExists);
        }

        let already_existed = self.store.retrieve_instance_details(instance_id).await.is_ok();
        self.store.create_instance_details(instance_id, &instance).await?;

        info!(
            "Service instance {} created (service: {}, plan: {})",
            instance_id, instance.service_id, instance.plan_id
        );
        Ok(ProvisionedService { already_existed })
    }

    async fn deprovision_locked(
        &self,
        instance_id: &str,
    ) -> Result<DeprovisionedService, BrokerError> {
        if self.store.retrieve_instance_details(instance_id).await.is_err() {
            return Err(BrokerError::InstanceGone);
        }

        self.store.delete_instance_details(instance_id).await?;
        info!("Service instance {} deleted", instance_id);

        Ok(DeprovisionedService {
            operation: "deprovision".to_string(),
        })
    }

    async fn bind_locked(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: BindDetails,
    ) -> Result<BindOutcome, BrokerError> {
        let instance = self
            .store
            .retrieve_instance_details(instance_id)
            .await
            .map_err(|_| BrokerError::InstanceDoesNotExist)?;

        if details.effective_app_guid().is_empty() {
            return Err(BrokerError::AppGuidNotProvided);
        }

        let mut opts = instance.fingerprint_options().ok_or_else(|| {
            BrokerError::Internal(format!(
                "unable to read service fingerprint of instance {}",
                instance_id
            ))
        })?;

        if let Some(params) = &details.parameters {
            for (key, value) in params {
                if key == SHARE_KEY || key == SOURCE_KEY {
                    error!("Bind configuration for {} may not override {}", binding_id, key);
                    return Err(BrokerError::BindOverride(key.clone()));
                }
                opts.insert(key.clone(), OptionValue::from(value));
            }
        }

        let mode = evaluate_mode(&opts)?;
        let container_dir = evaluate_container_path(&opts, instance_id);

        let working = self.mask.resolve_working_set(&opts).map_err(|e| {
            error!("Failed to resolve mount options for binding {}: {}", binding_id, e);
            e
        })?;

        if self.store.is_binding_conflict(binding_id, &details).await {
            warn!("Binding {} already exists with different details", binding_id);
            return Err(BrokerError::BindingAlreadyExists);
        }
        let already_existed = self.store.retrieve_binding_details(binding_id).await.is_ok();

        self.store.create_binding_details(binding_id, &details).await?;

        let mut mount_config = working.to_config();
        if self.broker_type == BrokerType::Nfs {
            if let Some(source) = mount_config.get_mut(SOURCE_KEY) {
                *source = format!("nfs://{}", source);
            }
        }

        let driver = self.broker_type.driver_name();
        debug!(
            "Binding {} for driver {} with options {:?}",
            binding_id,
            driver,
            working.to_cli_args("--")
        );

        let volume_id = format!("{}-{}", instance_id, config_digest(&mount_config)?);

        info!("Service binding {} created for instance {}", binding_id, instance_id);
        Ok(BindOutcome {
            binding: Binding {
                credentials: serde_json::Map::new(),
                volume_mounts: vec![VolumeMount {
                    driver: driver.to_string(),
                    container_dir,
                    mode,
                    device_type: DEVICE_TYPE_SHARED.to_string(),
                    device: SharedDevice {
                        volume_id,
                        mount_config,
                    },
                }],
            },
            already_existed,
        })
    }

    async fn unbind_locked(&self, instance_id: &str, binding_id: &str) -> Result<(), BrokerError> {
        if self.store.retrieve_instance_details(instance_id).await.is_err() {
            return Err(BrokerError::InstanceDoesNotExist);
        }
        if self.store.retrieve_binding_details(binding_id).await.is_err() {
            return Err(BrokerError::BindingGone);
        }

        self.store.delete_binding_details(binding_id).await?;
        info!("Service binding {} deleted", binding_id);
        Ok(())
    }
}

#[async_trait]
impl BrokerService for StandardBrokerService {
    fn services(&self) -> &Catalog {
        &self.catalog
    }

    async fn provision(
        &self,
        instance_id: &str,
        details: ProvisionDetails,
    ) -> Result<ProvisionedService, BrokerError> {
        info!("Provisioning service instance {}", instance_id);
        let _guard = self.lock.lock().await;
        let result = self.provision_locked(instance_id, details).await;
        self.finish("provision", result).await
    }

    async fn deprovision(&self, instance_id: &str) -> Result<DeprovisionedService, BrokerError> {
        info!("Deprovisioning service instance {}", instance_id);
        let _guard = self.lock.lock().await;
        let result = self.deprovision_locked(instance_id).await;
        self.finish("deprovision", result).await
    }

    async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: BindDetails,
    ) -> Result<BindOutcome, BrokerError> {
        info!("Binding {} to service instance {}", binding_id, instance_id);
        let _guard = self.lock.lock().await;
        let result = self.bind_locked(instance_id, binding_id, details).await;
        self.finish("bind", result).await
    }

    async fn unbind(&self, instance_id: &str, binding_id: &str) -> Result<(), BrokerError> {
        info!("Unbinding {} from service instance {}", binding_id, instance_id);
        let _guard = self.lock.lock().await;
        let result = self.unbind_locked(instance_id, binding_id).await;
        self.finish("unbind", result).await
    }

    async fn update(&self, instance_id: &str) -> Result<(), BrokerError> {
        warn!("Rejected update of service instance {}", instance_id);
        Err(BrokerError::UpdateNotSupported)
    }

    async fn last_operation(&self, instance_id: &str, operation: &str) -> Result<(), BrokerError> {
        debug!("Last operation {:?} requested for instance {}", operation, instance_id);
        let _guard = self.lock.lock().await;
        Err(BrokerError::UnrecognizedOperation)
    }

    async fn get_instance(&self, instance_id: &str) -> Result<InstanceSpec, BrokerError> {
        let instance = self
            .store
            .retrieve_instance_details(instance_id)
            .await
            .map_err(|_| BrokerError::InstanceDoesNotExist)?;

        Ok(InstanceSpec {
            service_id: instance.service_id,
            plan_id: instance.plan_id,
            parameters: instance.service_fingerprint,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn evaluate_mode(opts: &BTreeMap<String, OptionValue>) -> Result<String, BrokerError> {
    match opts.get(READONLY_KEY) {
        None => Ok("rw".to_string()),
        Some(value) => {
            let value = uniform_key_data(READONLY_KEY, value);
            if value == "true" {
                Ok("r".to_string())
            } else {
                Err(BrokerError::InvalidReadOnly(value))
            }
        }
    }
}

fn evaluate_container_path(opts: &BTreeMap<String, OptionValue>, instance_id: &str) -> String {
    match opts.get(MOUNT_KEY) {
        Some(OptionValue::String(dir)) if !dir.is_empty() => dir.clone(),
        _ => Path::new(DEFAULT_CONTAINER_PATH)
            .join(instance_id)
            .to_string_lossy()
            .into_owned(),
    }
}

fn config_digest(config: &BTreeMap<String, String>) -> Result<String, BrokerError> {
    let encoded = serde_json::to_vec(config).map_err(|e| BrokerError::Internal(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mount_mask::MountOptionsMask;
    use crate::infrastructure::repositories::InMemoryBrokerStore;
    use serde_json::json;

    fn mask(allowed: &[&str]) -> MountOptionsMask {
        MountOptionsMask::new(
            allowed.iter().map(|s| s.to_string()).collect(),
            BTreeMap::from([("auto_cache".to_string(), OptionValue::Bool(true))]),
            BTreeMap::from([
                ("share".to_string(), "source".to_string()),
                ("readonly".to_string(), "ro".to_string()),
            ]),
            vec![MOUNT_KEY.to_string()],
            vec![SOURCE_KEY.to_string()],
            None,
        )
        .unwrap()
    }

    fn broker(broker_type: BrokerType) -> (StandardBrokerService, InMemoryBrokerStore) {
        let store = InMemoryBrokerStore::new();
        let service = StandardBrokerService::new(
            broker_type,
            Catalog::default(),
            Arc::new(store.clone()),
            Arc::new(mask(&["uid", "gid", "source", "ro"])),
        )
        .unwrap();
        (service, store)
    }

    fn provision_details(params: serde_json::Value) -> ProvisionDetails {
        ProvisionDetails {
            service_id: "svc".to_string(),
            plan_id: "Existing".to_string(),
            organization_guid: "org".to_string(),
            space_guid: "space".to_string(),
            parameters: Some(params),
        }
    }

    fn bind_details(params: serde_json::Value) -> BindDetails {
        BindDetails {
            app_guid: "app".to_string(),
            plan_id: "Existing".to_string(),
            service_id: "svc".to_string(),
            bind_resource: None,
            parameters: params.as_object().cloned(),
        }
    }

    #[tokio::test]
    async fn test_provision_requires_share() {
        let (broker, _) = broker(BrokerType::Nfs);
        let err = broker
            .provision("i-1", provision_details(json!({"uid": "1000"})))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidConfiguration(_)));

        let err = broker
            .provision("i-1", provision_details(json!("server/export")))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::RawParamsInvalid));
    }

    #[tokio::test]
    async fn test_provision_rejects_source_and_server_colon() {
        let (broker, _) = broker(BrokerType::Nfs);
        let err = broker
            .provision("i-1", provision_details(json!({"share": "server/a", "source": "x"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("['source']"));

        let err = broker
            .provision("i-1", provision_details(json!({"share": "server:/export"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no colon allowed"));
    }

    #[tokio::test]
    async fn test_smb_allows_server_colon() {
        let (broker, _) = broker(BrokerType::Smb);
        broker
            .provision("i-1", provision_details(json!({"share": "server:/export"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_provision_conflicts() {
        let (broker, _) = broker(BrokerType::Nfs);
        let first = broker
            .provision("i-1", provision_details(json!({"share": "server/a"})))
            .await
            .unwrap();
        assert!(!first.already_existed);

        let again = broker
            .provision("i-1", provision_details(json!({"share": "server/a"})))
            .await
            .unwrap();
        assert!(again.already_existed);

        let err = broker
            .provision("i-1", provision_details(json!({"share": "server/b"})))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InstanceAlreadyExists));
    }

    #[tokio::test]
    async fn test_bind_produces_nfs_volume_mount() {
        let (broker, _) = broker(BrokerType::Nfs);
        broker
            .provision("i-1", provision_details(json!({"share": "server/export", "uid": "1000"})))
            .await
            .unwrap();

        let outcome = broker
            .bind("i-1", "b-1", bind_details(json!({"gid": "2000"})))
            .await
            .unwrap();
        let mount = &outcome.binding.volume_mounts[0];

        assert_eq!(mount.driver, "nfsv3driver");
        assert_eq!(mount.mode, "rw");
        assert_eq!(mount.device_type, "shared");
        assert_eq!(mount.container_dir, "/var/vcap/data/i-1");
        assert!(mount.device.volume_id.starts_with("i-1-"));

        let config = &mount.device.mount_config;
        assert_eq!(config["source"], "nfs://server/export");
        assert_eq!(config["uid"], "1000");
        assert_eq!(config["gid"], "2000");
        assert_eq!(config["auto_cache"], "true");
        assert!(outcome.binding.credentials.is_empty());
    }

    #[tokio::test]
    async fn test_bind_volume_id_is_stable() {
        let (broker, _) = broker(BrokerType::Smb);
        broker
            .provision("i-1", provision_details(json!({"share": "//server/export"})))
            .await
            .unwrap();

        let a = broker.bind("i-1", "b-1", bind_details(json!({}))).await.unwrap();
        let b = broker.bind("i-1", "b-2", bind_details(json!({}))).await.unwrap();
        let (a, b) = (&a.binding.volume_mounts[0], &b.binding.volume_mounts[0]);

        assert_eq!(a.driver, "smbdriver");
        assert_eq!(a.device.mount_config["source"], "//server/export");
        assert_eq!(a.device.volume_id, b.device.volume_id);
    }

    #[tokio::test]
    async fn test_bind_mode_and_mount_point() {
        let (broker, _) = broker(BrokerType::Nfs);
        broker
            .provision("i-1", provision_details(json!({"share": "server/export"})))
            .await
            .unwrap();

        let outcome = broker
            .bind("i-1", "b-1", bind_details(json!({"readonly": true, "mount": "/data"})))
            .await
            .unwrap();
        let mount = &outcome.binding.volume_mounts[0];
        assert_eq!(mount.mode, "r");
        assert_eq!(mount.container_dir, "/data");
        assert_eq!(mount.device.mount_config["ro"], "true");
        assert!(!mount.device.mount_config.contains_key("mount"));

        let err = broker
            .bind("i-1", "b-2", bind_details(json!({"readonly": "yes"})))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidReadOnly(_)));
    }

    #[tokio::test]
    async fn test_bind_rejections() {
        let (broker, store) = broker(BrokerType::Nfs);
        let err = broker.bind("i-1", "b-1", bind_details(json!({}))).await.unwrap_err();
        assert!(matches!(err, BrokerError::InstanceDoesNotExist));

        broker
            .provision("i-1", provision_details(json!({"share": "server/export"})))
            .await
            .unwrap();

        let mut no_app = bind_details(json!({}));
        no_app.app_guid.clear();
        assert!(matches!(
            broker.bind("i-1", "b-1", no_app).await.unwrap_err(),
            BrokerError::AppGuidNotProvided
        ));

        let err = broker
            .bind("i-1", "b-1", bind_details(json!({"share": "other/export"})))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::BindOverride(key) if key == "share"));

        let err = broker
            .bind("i-1", "b-1", bind_details(json!({"nolock": true})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::MountOptions(MountOptionsError::Disallowed(keys))
                if keys == vec!["nolock".to_string()]
        ));

        assert!(store.retrieve_binding_details("b-1").await.is_err());
    }

    #[tokio::test]
    async fn test_rebind_conflicts() {
        let (broker, _) = broker(BrokerType::Nfs);
        broker
            .provision("i-1", provision_details(json!({"share": "server/export"})))
            .await
            .unwrap();

        broker.bind("i-1", "b-1", bind_details(json!({"uid": "1"}))).await.unwrap();
        let again = broker.bind("i-1", "b-1", bind_details(json!({"uid": "1"}))).await.unwrap();
        assert!(again.already_existed);

        let err = broker
            .bind("i-1", "b-1", bind_details(json!({"uid": "2"})))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::BindingAlreadyExists));
    }

    #[tokio::test]
    async fn test_unbind_and_deprovision() {
        let (broker, _) = broker(BrokerType::Nfs);
        assert!(matches!(
            broker.unbind("i-1", "b-1").await.unwrap_err(),
            BrokerError::InstanceDoesNotExist
        ));
        assert!(matches!(
            broker.deprovision("i-1").await.unwrap_err(),
            BrokerError::InstanceGone
        ));

        broker
            .provision("i-1", provision_details(json!({"share": "server/export"})))
            .await
            .unwrap();
        assert!(matches!(
            broker.unbind("i-1", "b-1").await.unwrap_err(),
            BrokerError::BindingGone
        ));

        broker.bind("i-1", "b-1", bind_details(json!({}))).await.unwrap();
        broker.unbind("i-1", "b-1").await.unwrap();

        let gone = broker.deprovision("i-1").await.unwrap();
        assert_eq!(gone.operation, "deprovision");
        assert!(broker.get_instance("i-1").await.is_err());
    }

    #[tokio::test]
    async fn test_update_and_last_operation_always_fail() {
        let (broker, _) = broker(BrokerType::Nfs);
        assert_eq!(
            broker.update("i-1").await.unwrap_err().to_string(),
            UPDATE_NOT_SUPPORTED
        );
        assert_eq!(
            broker.last_operation("i-1", "deprovision").await.unwrap_err().to_string(),
            "unrecognized operationData"
        );
    }

    #[tokio::test]
    async fn test_get_instance_returns_parameters() {
        let (broker, _) = broker(BrokerType::Nfs);
        broker
            .provision("i-1", provision_details(json!({"share": "server/export", "uid": "1"})))
            .await
            .unwrap();

        let spec = broker.get_instance("i-1").await.unwrap();
        assert_eq!(spec.plan_id, "Existing");
        assert_eq!(spec.parameters["uid"], "1");
    }

    #[test]
    fn test_broker_type_parsing() {
        assert_eq!("NFS".parse::<BrokerType>().unwrap(), BrokerType::Nfs);
        assert_eq!("smb".parse::<BrokerType>().unwrap(), BrokerType::Smb);
        assert!("ceph".parse::<BrokerType>().is_err());
    }
}
