// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mount Option Sets
//!
//! Holds the string-valued option map that ends up as the volume driver's
//! mount configuration, split into two disjoint buckets:
//!
//! | Bucket | Source | Overridable by callers |
//! |--------|--------|------------------------|
//! | `options` | operator defaults for allow-listed keys, then caller input | yes |
//! | `forced` | operator defaults for keys *not* on the allow-list | no |
//!
//! Untyped caller input (share URL query strings, JSON request bodies) is
//! normalised into [`OptionValue`] at the boundary and coerced to strings by
//! [`uniform_key_data`] before it is stored.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Merge and validate mount options from multiple sources

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Control-plane key that tolerates unknown options. Never emitted.
pub const SLOPPY_MOUNT_KEY: &str = "sloppy_mount";

/// Keys whose boolean values render as `1`/`0` rather than `true`/`false`.
const BOOL_AS_INT_KEYS: &[&str] = &["auto-traverse-mounts", "dircache"];

/// Fully resolved mount configuration handed to the volume driver.
pub type MountConfig = BTreeMap<String, String>;

// ============================================================================
// Value Objects
// ============================================================================

/// A single scalar option value as decoded from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    String(String),
    Bool(bool),
    Int(i64),
    /// Anything that is not a string, boolean or integer (floats, null,
    /// arrays, objects). Treated as absent.
    Missing,
}

impl OptionValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Normalise a JSON object into option values.
    pub fn map_from_json(
        object: &serde_json::Map<String, serde_json::Value>,
    ) -> BTreeMap<String, OptionValue> {
        object
            .iter()
            .map(|(key, value)| (key.clone(), OptionValue::from(value)))
            .collect()
    }
}

impl From<&serde_json::Value> for OptionValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => {
                    warn!("Non-integer numeric option value {} treated as absent", n);
                    Self::Missing
                }
            },
            other => {
                warn!("Unsupported option value {} treated as absent", other);
                Self::Missing
            }
        }
    }
}

impl From<serde_json::Value> for OptionValue {
    fn from(value: serde_json::Value) -> Self {
        Self::from(&value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Errors produced while merging caller input into an option set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountOptionsError {
    #[error("disallowed options: {}", .0.join(", "))]
    Disallowed(Vec<String>),

    #[error("invalid value for option {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("missing mandatory option {0}")]
    MissingMandatory(String),
}

// ============================================================================
// Parsing helpers
// ============================================================================

/// Boolean parsing with the literal set accepted by volume drivers:
/// `1 t T TRUE true True` and `0 f F FALSE false False`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Coerce a value to the string stored in the option set.
///
/// Booleans render as `true`/`false`, except for the keys in
/// `BOOL_AS_INT_KEYS` which take `1`/`0`. `Missing` becomes the empty
/// string, which callers treat as "not supplied".
pub fn uniform_key_data(key: &str, value: &OptionValue) -> String {
    match value {
        OptionValue::Bool(b) if BOOL_AS_INT_KEYS.contains(&key) => {
            if *b {
                "1".to_string()
            } else {
                "0".to_string()
            }
        }
        OptionValue::Bool(b) => b.to_string(),
        OptionValue::Int(i) => i.to_string(),
        OptionValue::String(s) => s.clone(),
        OptionValue::Missing => String::new(),
    }
}

/// Parse a `key1<sep>value1,key2<sep>value2` specification.
///
/// Entries without a separator or with an empty key are skipped; an empty
/// value is kept as the empty string.
pub fn parse_option_string(spec: &str, separator: char) -> BTreeMap<String, String> {
    spec.split(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once(separator)?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parse a comma separated key list, dropping blanks.
pub fn parse_key_list(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strip everything from the first `?` onward.
pub fn share_without_query(share: &str) -> &str {
    share.split_once('?').map_or(share, |(source, _)| source)
}

/// `key=value` pairs from the query part of a share URL, in order.
///
/// Pairs without `=` or with an empty key or value are skipped.
pub fn share_query_pairs(share: &str) -> Vec<(String, String)> {
    let Some((_, query)) = share.split_once('?') else {
        return Vec::new();
    };

    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

// ============================================================================
// OptionSet
// ============================================================================

/// Working set of mount options.
///
/// A baseline is built once from operator defaults; every request merges
/// into its own [`OptionSet::working_copy`]. `merge` takes `&mut self`, so a
/// baseline shared behind `&` cannot be mutated by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    allowed: Arc<[String]>,
    forced: BTreeMap<String, String>,
    options: BTreeMap<String, String>,
    sloppy_mount: bool,
    // keys written by caller input during merge
    supplied: BTreeSet<String>,
}

impl OptionSet {
    /// Build a baseline from a comma separated allow-list and a
    /// `key:value,...` default specification.
    pub fn load_defaults(allowed_keys: &str, default_spec: &str) -> Self {
        let defaults = parse_option_string(default_spec, ':')
            .into_iter()
            .map(|(key, value)| (key, OptionValue::String(value)));

        Self::from_defaults(parse_key_list(allowed_keys), defaults)
    }

    /// Build a baseline from typed defaults. Defaults for keys outside
    /// `allowed` land in the forced bucket.
    pub fn from_defaults<I>(allowed: Vec<String>, defaults: I) -> Self
    where
        I: IntoIterator<Item = (String, OptionValue)>,
    {
        let mut set = Self {
            allowed: allowed.into(),
            ..Self::default()
        };

        for (key, value) in defaults {
            if value.is_missing() {
                warn!("Default for option '{}' has an unsupported type and is ignored", key);
                continue;
            }
            let coerced = uniform_key_data(&key, &value);
            if set.is_allowed(&key) {
                set.options.insert(key, coerced);
            } else {
                set.forced.insert(key, coerced);
            }
        }

        set
    }

    /// Independent copy for a single merge. Shares only the read-only
    /// allow-list with `self`.
    pub fn working_copy(&self) -> Self {
        Self {
            allowed: Arc::clone(&self.allowed),
            forced: self.forced.clone(),
            options: self.options.clone(),
            sloppy_mount: self.sloppy_mount,
            supplied: BTreeSet::new(),
        }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn forced(&self) -> &BTreeMap<String, String> {
        &self.forced
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn is_sloppy_mount(&self) -> bool {
        self.sloppy_mount
    }

    /// Keys accepted from caller input by the last merge.
    pub fn supplied_keys(&self) -> impl Iterator<Item = &str> {
        self.supplied.iter().map(String::as_str)
    }

    fn is_allowed(&self, key: &str) -> bool {
        self.allowed.iter().any(|k| k == key)
    }

    /// Merge legacy share URL parameters and caller parameters.
    ///
    /// Precedence is defaults < share URL query < `caller_params`; forced
    /// values are untouched. Keys in `ignore_keys` are dropped silently.
    /// Unknown keys fail the merge unless sloppy mount is in effect, in
    /// which case they are dropped.
    pub fn merge(
        &mut self,
        share: &str,
        caller_params: &BTreeMap<String, OptionValue>,
        ignore_keys: &[String],
    ) -> Result<(), MountOptionsError> {
        self.merge_query_pairs(&share_query_pairs(share), caller_params, ignore_keys)
    }

    /// [`Self::merge`] with the share query already split into pairs, for
    /// callers that rewrite query keys before merging.
    pub fn merge_query_pairs(
        &mut self,
        query: &[(String, String)],
        caller_params: &BTreeMap<String, OptionValue>,
        ignore_keys: &[String],
    ) -> Result<(), MountOptionsError> {
        let ignored = |key: &str| ignore_keys.iter().any(|k| k == key);
        let mut rejected: Vec<String> = Vec::new();

        for (key, value) in query {
            if ignored(key) {
                continue;
            }
            self.absorb(key, &OptionValue::String(value.clone()), &mut rejected);
        }

        for (key, value) in caller_params {
            if key.is_empty() || ignored(key) {
                continue;
            }
            self.absorb(key, value, &mut rejected);
        }

        self.sloppy_mount = self.take_sloppy_mount();
        self.supplied.remove(SLOPPY_MOUNT_KEY);

        if rejected.is_empty() {
            return Ok(());
        }

        if self.sloppy_mount {
            debug!("Sloppy mount enabled, dropping disallowed options: {:?}", rejected);
            return Ok(());
        }

        Err(MountOptionsError::Disallowed(rejected))
    }

    fn absorb(&mut self, key: &str, value: &OptionValue, rejected: &mut Vec<String>) {
        let coerced = uniform_key_data(key, value);
        if coerced.is_empty() {
            return;
        }

        if self.is_allowed(key) {
            self.options.insert(key.to_string(), coerced);
            self.supplied.insert(key.to_string());
        } else if key == SLOPPY_MOUNT_KEY || self.forced.contains_key(key) {
            debug!("Option '{}' is operator controlled, caller value ignored", key);
        } else if !rejected.iter().any(|k| k == key) {
            rejected.push(key.to_string());
        }
    }

    fn take_sloppy_mount(&mut self) -> bool {
        let from_options = self.options.remove(SLOPPY_MOUNT_KEY);
        let from_forced = self.forced.remove(SLOPPY_MOUNT_KEY);

        match from_forced.or(from_options) {
            Some(raw) => parse_bool(&raw).unwrap_or(false),
            None => self.sloppy_mount,
        }
    }

    /// Union of options and forced values; forced wins on collision.
    pub fn to_config(&self) -> MountConfig {
        let mut config = self.options.clone();
        config.extend(self.forced.iter().map(|(k, v)| (k.clone(), v.clone())));
        config.remove(SLOPPY_MOUNT_KEY);
        config
    }

    /// Render as flag-style arguments, e.g. `--uid=1000 --allow_other`.
    pub fn to_cli_args(&self, prefix: &str) -> Vec<String> {
        self.to_config()
            .into_iter()
            .filter_map(|(key, value)| {
                if let Ok(number) = value.parse::<i16>() {
                    return Some(format!("{prefix}{key}={number}"));
                }
                match parse_bool(&value) {
                    Some(true) => Some(format!("{prefix}{key}")),
                    Some(false) => None,
                    None => Some(format!("{prefix}{key}={value}")),
                }
            })
            .collect()
    }
}
