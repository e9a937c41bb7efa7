// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Service Instances and Bindings
//!
//! Records persisted by the broker store plus the catalog and bind response
//! shapes exchanged with the platform.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::mount_options::OptionValue;

/// Key under which redacted binding parameters keep their digest.
pub const PARAMS_HASH_KEY: &str = "paramsHash";

/// Caller-facing key naming the share when provisioning.
pub const SHARE_KEY: &str = "share";

/// Mount permission the platform must grant to bind this service.
pub const PERMISSION_VOLUME_MOUNT: &str = "volume_mount";

// ============================================================================
// Persisted records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub organization_guid: String,
    #[serde(default)]
    pub space_guid: String,
    /// Provision-time parameters. Legacy records hold a bare share string.
    #[serde(default)]
    pub service_fingerprint: serde_json::Value,
}

impl ServiceInstance {
    /// Fingerprint as raw bind options; a bare string becomes `{share: ..}`.
    pub fn fingerprint_options(&self) -> Option<BTreeMap<String, OptionValue>> {
        match &self.service_fingerprint {
            serde_json::Value::Object(map) => Some(OptionValue::map_from_json(map)),
            serde_json::Value::String(share) => Some(BTreeMap::from([(
                SHARE_KEY.to_string(),
                OptionValue::String(share.clone()),
            )])),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_guid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindDetails {
    #[serde(default)]
    pub app_guid: String,
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_resource: Option<BindResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
}

impl BindDetails {
    /// App GUID from the top level or, failing that, the bind resource.
    pub fn effective_app_guid(&self) -> &str {
        if !self.app_guid.is_empty() {
            return &self.app_guid;
        }
        self.bind_resource
            .as_ref()
            .map(|r| r.app_guid.as_str())
            .unwrap_or("")
    }

    /// Copy suitable for storage: parameters replaced by their digest.
    /// Already-redacted details are returned unchanged.
    pub fn redacted(&self) -> Self {
        let mut details = self.clone();
        if let Some(params) = &self.parameters {
            if !is_redacted(params) {
                let mut hashed = serde_json::Map::new();
                hashed.insert(
                    PARAMS_HASH_KEY.to_string(),
                    serde_json::Value::String(params_digest(params)),
                );
                details.parameters = Some(hashed);
            }
        }
        details
    }

    /// True when `self` (as stored) differs from an incoming request.
    pub fn conflicts_with(&self, incoming: &BindDetails) -> bool {
        if self.app_guid != incoming.app_guid
            || self.plan_id != incoming.plan_id
            || self.service_id != incoming.service_id
            || self.bind_resource != incoming.bind_resource
        {
            return true;
        }

        match (&self.parameters, &incoming.parameters) {
            (None, None) => false,
            (Some(stored), Some(requested)) => {
                let stored_hash = stored.get(PARAMS_HASH_KEY).and_then(|v| v.as_str());
                let requested_hash = params_digest(requested);
                stored_hash != Some(requested_hash.as_str())
            }
            _ => true,
        }
    }
}

fn is_redacted(params: &serde_json::Map<String, serde_json::Value>) -> bool {
    params.len() == 1 && params.contains_key(PARAMS_HASH_KEY)
}

fn params_digest(params: &serde_json::Map<String, serde_json::Value>) -> String {
    // serde_json maps are key-ordered, so the encoding is canonical
    let encoded = serde_json::to_vec(params).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub bindable: bool,
    #[serde(default)]
    pub plan_updateable: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub plans: Vec<ServicePlan>,
}

/// Service catalog advertised to the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub services: Vec<Service>,
}

impl Catalog {
    /// Parse a services config: a JSON array of services.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let services: Vec<Service> = serde_json::from_str(json)?;
        Ok(Self { services })
    }

    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json_str(&content)?)
    }
}

// ============================================================================
// Bind response
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedDevice {
    pub volume_id: String,
    pub mount_config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub driver: String,
    pub container_dir: String,
    pub mode: String,
    pub device_type: String,
    pub device: SharedDevice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Always an empty object; the platform rejects a null here.
    pub credentials: serde_json::Map<String, serde_json::Value>,
    pub volume_mounts: Vec<VolumeMount>,
}
