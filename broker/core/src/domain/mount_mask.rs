// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mount Options Mask
//!
//! Operator policy for bind-time mount options: the allow-list, defaults,
//! key renames, ignored and mandatory keys, and an optional per-key
//! validator. The mask is built once at startup and only ever read;
//! [`MountOptionsMask::resolve`] merges into a private working copy of the
//! baseline so concurrent binds never observe each other.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Turn raw caller parameters into a validated mount configuration

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::domain::mount_options::{
    parse_bool, share_query_pairs, share_without_query, uniform_key_data, MountConfig,
    MountOptionsError, OptionSet, OptionValue, SLOPPY_MOUNT_KEY,
};

/// Canonical key carrying the mount source (callers usually say `share`).
pub const SOURCE_KEY: &str = "source";

/// Errors raised while building a mask
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaskError {
    #[error("invalid sloppy_mount option: {0:?} is not a boolean")]
    InvalidSloppyMount(String),
}

/// Per-key value check run against every accepted caller option.
pub trait OptionValidator: Send + Sync {
    /// Return a human readable reason when `value` is not acceptable for `key`.
    fn validate(&self, key: &str, value: &str) -> Result<(), String>;
}

impl<F> OptionValidator for F
where
    F: Fn(&str, &str) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, key: &str, value: &str) -> Result<(), String> {
        self(key, value)
    }
}

/// Requires boolean-parseable values for a fixed set of keys.
#[derive(Debug, Clone, Default)]
pub struct BooleanOptionValidator {
    keys: BTreeSet<String>,
}

impl BooleanOptionValidator {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl OptionValidator for BooleanOptionValidator {
    fn validate(&self, key: &str, value: &str) -> Result<(), String> {
        if self.keys.contains(key) && parse_bool(value).is_none() {
            return Err(format!("expected a boolean, got {:?}", value));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MountOptionsMask {
    allowed: Vec<String>,
    defaults: BTreeMap<String, OptionValue>,
    key_perms: BTreeMap<String, String>,
    ignored: Vec<String>,
    mandatory: Vec<String>,
    validator: Option<Arc<dyn OptionValidator>>,
    baseline: OptionSet,
}

impl fmt::Debug for MountOptionsMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountOptionsMask")
            .field("allowed", &self.allowed)
            .field("defaults", &self.defaults)
            .field("key_perms", &self.key_perms)
            .field("ignored", &self.ignored)
            .field("mandatory", &self.mandatory)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl MountOptionsMask {
    /// Build the mask. `allowed`, `ignored` and `mandatory` are canonical
    /// (post-rename) key names; default keys are renamed through
    /// `key_perms` like caller keys.
    pub fn new(
        allowed: Vec<String>,
        defaults: BTreeMap<String, OptionValue>,
        key_perms: BTreeMap<String, String>,
        ignored: Vec<String>,
        mandatory: Vec<String>,
        validator: Option<Arc<dyn OptionValidator>>,
    ) -> Result<Self, MaskError> {
        let defaults = rename_keys(&key_perms, &defaults);

        // the working set reads sloppy_mount from the baseline at merge time
        if let Some(value) = defaults.get(SLOPPY_MOUNT_KEY) {
            let raw = uniform_key_data(SLOPPY_MOUNT_KEY, value);
            if parse_bool(&raw).is_none() {
                return Err(MaskError::InvalidSloppyMount(raw));
            }
        }

        let baseline = OptionSet::from_defaults(allowed.clone(), defaults.clone());

        Ok(Self {
            allowed,
            defaults,
            key_perms,
            ignored,
            mandatory,
            validator,
            baseline,
        })
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn defaults(&self) -> &BTreeMap<String, OptionValue> {
        &self.defaults
    }

    pub fn key_perms(&self) -> &BTreeMap<String, String> {
        &self.key_perms
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    pub fn mandatory(&self) -> &[String] {
        &self.mandatory
    }

    /// Baseline option set seeded from the defaults. Read-only.
    pub fn baseline(&self) -> &OptionSet {
        &self.baseline
    }

    /// Resolve raw caller options into the final mount configuration.
    ///
    /// A query string on the `source` value is absorbed as legacy share URL
    /// parameters, with the explicit options taking precedence over it. Query
    /// keys go through the same rename table as caller keys.
    pub fn resolve(
        &self,
        raw_options: &BTreeMap<String, OptionValue>,
    ) -> Result<MountConfig, MountOptionsError> {
        self.resolve_working_set(raw_options).map(|set| set.to_config())
    }

    /// Same as [`Self::resolve`] but hands back the merged working set, for
    /// callers that also need the driver argument rendering.
    pub fn resolve_working_set(
        &self,
        raw_options: &BTreeMap<String, OptionValue>,
    ) -> Result<OptionSet, MountOptionsError> {
        let mut canonical = rename_keys(&self.key_perms, raw_options);

        let share = match canonical.get(SOURCE_KEY) {
            Some(OptionValue::String(source)) if source.contains('?') => source.clone(),
            _ => String::new(),
        };

        let query = rename_query_keys(&self.key_perms, share_query_pairs(&share));
        if !share.is_empty() {
            canonical.insert(
                SOURCE_KEY.to_string(),
                OptionValue::String(share_without_query(&share).to_string()),
            );
        }

        let mut working = self.baseline.working_copy();
        working.merge_query_pairs(&query, &canonical, &self.ignored)?;

        if let Some(validator) = &self.validator {
            for key in working.supplied_keys() {
                let Some(value) = working.options().get(key) else {
                    continue;
                };
                validator
                    .validate(key, value)
                    .map_err(|reason| MountOptionsError::InvalidValue {
                        key: key.to_string(),
                        reason,
                    })?;
            }
        }

        let resolved = working.to_config();
        if let Some(missing) = self.mandatory.iter().find(|k| !resolved.contains_key(*k)) {
            return Err(MountOptionsError::MissingMandatory(missing.clone()));
        }

        debug!("Resolved {} mount options", resolved.len());
        Ok(working)
    }
}

/// Apply the rename table. Renamed (aliased) entries are written last, so an
/// alias wins over its canonical key when a caller supplies both.
fn rename_keys(
    key_perms: &BTreeMap<String, String>,
    raw: &BTreeMap<String, OptionValue>,
) -> BTreeMap<String, OptionValue> {
    let mut canonical: BTreeMap<String, OptionValue> = raw
        .iter()
        .filter(|(key, _)| !key_perms.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for (key, value) in raw {
        if let Some(target) = key_perms.get(key) {
            canonical.insert(target.clone(), value.clone());
        }
    }

    canonical
}

fn rename_query_keys(
    key_perms: &BTreeMap<String, String>,
    pairs: Vec<(String, String)>,
) -> Vec<(String, String)> {
    pairs
        .into_iter()
        .map(|(key, value)| match key_perms.get(&key) {
            Some(target) => (target.clone(), value),
            None => (key, value),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    fn options(entries: &[(&str, OptionValue)]) -> BTreeMap<String, OptionValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn nfs_perms() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("share".to_string(), "source".to_string()),
            ("readonly".to_string(), "ro".to_string()),
        ])
    }

    #[test]
    fn test_invalid_sloppy_mount_default() {
        let err = MountOptionsMask::new(
            vec![],
            options(&[("sloppy_mount", OptionValue::from("sometimes"))]),
            BTreeMap::new(),
            vec![],
            vec![],
            None,
        )
        .unwrap_err();
        assert_eq!(err, MaskError::InvalidSloppyMount("sometimes".to_string()));
    }

    #[test]
    fn test_sloppy_mount_default_parsed() {
        let mask = MountOptionsMask::new(
            vec![],
            options(&[("sloppy_mount", OptionValue::Bool(true))]),
            BTreeMap::new(),
            vec![],
            vec![],
            None,
        )
        .unwrap();

        let working = mask
            .resolve_working_set(&options(&[("bogus", OptionValue::from("x"))]))
            .unwrap();
        assert!(working.is_sloppy_mount());
        assert!(working.to_config().is_empty());
    }

    #[test]
    fn test_end_to_end_forced_default() {
        let mask = MountOptionsMask::new(
            keys(&["uid", "gid"]),
            options(&[("auto_cache", OptionValue::Bool(true))]),
            BTreeMap::new(),
            vec![],
            vec![],
            None,
        )
        .unwrap();

        let resolved = mask
            .resolve(&options(&[
                ("uid", OptionValue::from("1004")),
                ("gid", OptionValue::from("1002")),
            ]))
            .unwrap();

        let expected = MountConfig::from([
            ("uid".to_string(), "1004".to_string()),
            ("gid".to_string(), "1002".to_string()),
            ("auto_cache".to_string(), "true".to_string()),
        ]);
        assert_eq!(resolved, expected);
    }

    #[test]
    fn test_precedence_caller_over_default_and_forced_over_caller() {
        let mask = MountOptionsMask::new(
            keys(&["uid"]),
            options(&[("uid", OptionValue::from("1")), ("gid", OptionValue::from("5"))]),
            BTreeMap::new(),
            vec![],
            vec![],
            None,
        )
        .unwrap();

        let resolved = mask
            .resolve(&options(&[
                ("uid", OptionValue::from("2")),
                ("gid", OptionValue::from("6")),
            ]))
            .unwrap();

        assert_eq!(resolved["uid"], "2");
        assert_eq!(resolved["gid"], "5");
    }

    #[test]
    fn test_disallowed_and_sloppy() {
        let strict = MountOptionsMask::new(
            keys(&["uid"]),
            BTreeMap::new(),
            BTreeMap::new(),
            vec![],
            vec![],
            None,
        )
        .unwrap();
        let err = strict
            .resolve(&options(&[("bogus", OptionValue::from("x"))]))
            .unwrap_err();
        assert_eq!(err, MountOptionsError::Disallowed(keys(&["bogus"])));
        assert_eq!(err.to_string(), "disallowed options: bogus");

        let sloppy = MountOptionsMask::new(
            keys(&["uid"]),
            options(&[("sloppy_mount", OptionValue::from("true"))]),
            BTreeMap::new(),
            vec![],
            vec![],
            None,
        )
        .unwrap();
        let resolved = sloppy
            .resolve(&options(&[("bogus", OptionValue::from("x"))]))
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mask = MountOptionsMask::new(
            keys(&["uid", "gid", "source"]),
            options(&[("auto_cache", OptionValue::Bool(true))]),
            nfs_perms(),
            vec![],
            keys(&["source"]),
            None,
        )
        .unwrap();
        let input = options(&[
            ("share", OptionValue::from("server/export?gid=3")),
            ("uid", OptionValue::Int(1000)),
        ]);

        let first = mask.resolve(&input).unwrap();
        let second = mask.resolve(&input).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first["source"], "server/export");
        assert_eq!(first["gid"], "3");
    }

    #[test]
    fn test_share_query_loses_to_explicit_option() {
        let mask = MountOptionsMask::new(
            keys(&["uid", "source"]),
            BTreeMap::new(),
            nfs_perms(),
            vec![],
            vec![],
            None,
        )
        .unwrap();

        let resolved = mask
            .resolve(&options(&[
                ("share", OptionValue::from("nfs://host?uid=1")),
                ("uid", OptionValue::from("2")),
            ]))
            .unwrap();
        assert_eq!(resolved["uid"], "2");
        assert_eq!(resolved["source"], "nfs://host");
    }

    #[test]
    fn test_renames_apply_to_allow_check_and_output() {
        let mask = MountOptionsMask::new(
            keys(&["ro", "source"]),
            BTreeMap::new(),
            nfs_perms(),
            vec![],
            vec![],
            None,
        )
        .unwrap();

        let resolved = mask
            .resolve(&options(&[
                ("share", OptionValue::from("server/export")),
                ("readonly", OptionValue::Bool(true)),
            ]))
            .unwrap();

        assert_eq!(resolved["ro"], "true");
        assert_eq!(resolved["source"], "server/export");
        assert!(!resolved.contains_key("readonly"));
        assert!(!resolved.contains_key("share"));
    }

    #[test]
    fn test_mandatory_enforced() {
        let mask = MountOptionsMask::new(
            keys(&["uid", "source"]),
            BTreeMap::new(),
            nfs_perms(),
            vec![],
            keys(&["source"]),
            None,
        )
        .unwrap();

        let err = mask
            .resolve(&options(&[("uid", OptionValue::from("1"))]))
            .unwrap_err();
        assert_eq!(err, MountOptionsError::MissingMandatory("source".to_string()));

        assert!(mask
            .resolve(&options(&[("share", OptionValue::from("server/export"))]))
            .is_ok());
    }

    #[test]
    fn test_validator_rejects_even_when_sloppy() {
        let validator: Arc<dyn OptionValidator> =
            Arc::new(BooleanOptionValidator::new(["cache"]));
        let mask = MountOptionsMask::new(
            keys(&["cache"]),
            options(&[("sloppy_mount", OptionValue::Bool(true))]),
            BTreeMap::new(),
            vec![],
            vec![],
            Some(validator),
        )
        .unwrap();

        let err = mask
            .resolve(&options(&[("cache", OptionValue::from("maybe"))]))
            .unwrap_err();
        assert!(matches!(err, MountOptionsError::InvalidValue { ref key, .. } if key == "cache"));
        assert!(err.to_string().starts_with("invalid value for option cache:"));

        assert!(mask.resolve(&options(&[("cache", OptionValue::Bool(false))])).is_ok());
    }

    #[test]
    fn test_closure_validator_sees_canonical_keys() {
        let validator: Arc<dyn OptionValidator> = Arc::new(|key: &str, value: &str| {
            if key == "ro" && value != "true" {
                Err("only read-only mounts are offered".to_string())
            } else {
                Ok(())
            }
        });
        let mask = MountOptionsMask::new(
            keys(&["ro"]),
            BTreeMap::new(),
            nfs_perms(),
            vec![],
            vec![],
            Some(validator),
        )
        .unwrap();

        let err = mask
            .resolve(&options(&[("readonly", OptionValue::Bool(false))]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for option ro: only read-only mounts are offered"
        );
    }

    #[test]
    fn test_baseline_untouched_by_resolve() {
        let mask = MountOptionsMask::new(
            keys(&["uid"]),
            options(&[("uid", OptionValue::from("1"))]),
            BTreeMap::new(),
            vec![],
            vec![],
            None,
        )
        .unwrap();
        mask.resolve(&options(&[("uid", OptionValue::from("99"))])).unwrap();
        assert_eq!(mask.baseline().options()["uid"], "1");
    }

    #[test]
    fn test_share_query_keys_are_renamed() {
        let mask = MountOptionsMask::new(
            keys(&["ro", "uid", "source"]),
            BTreeMap::new(),
            nfs_perms(),
            vec![],
            vec![],
            None,
        )
        .unwrap();

        let from_body = mask
            .resolve(&options(&[
                ("share", OptionValue::from("server/export")),
                ("readonly", OptionValue::from("true")),
            ]))
            .unwrap();
        let from_query = mask
            .resolve(&options(&[(
                "share",
                OptionValue::from("server/export?readonly=true&uid=7"),
            )]))
            .unwrap();

        assert_eq!(from_query["ro"], "true");
        assert_eq!(from_query["uid"], "7");
        assert_eq!(from_query["source"], "server/export");
        assert!(!from_query.contains_key("readonly"));
        assert_eq!(from_body["ro"], from_query["ro"]);
    }

    #[test]
    fn test_renamed_query_key_still_loses_to_explicit_option() {
        let mask = MountOptionsMask::new(
            keys(&["ro", "source"]),
            BTreeMap::new(),
            nfs_perms(),
            vec![],
            vec![],
            None,
        )
        .unwrap();

        let resolved = mask
            .resolve(&options(&[
                ("share", OptionValue::from("server/export?readonly=true")),
                ("ro", OptionValue::from("false")),
            ]))
            .unwrap();
        assert_eq!(resolved["ro"], "false");
    }

    #[test]
    fn test_bool_as_int_keys_through_resolve() {
        let mask = MountOptionsMask::new(
            keys(&["auto-traverse-mounts", "allow_other"]),
            BTreeMap::new(),
            BTreeMap::new(),
            vec![],
            vec![],
            None,
        )
        .unwrap();

        let on = mask
            .resolve(&options(&[("auto-traverse-mounts", OptionValue::Bool(true))]))
            .unwrap();
        assert_eq!(on["auto-traverse-mounts"], "1");

        let off = mask
            .resolve(&options(&[("auto-traverse-mounts", OptionValue::Bool(false))]))
            .unwrap();
        assert_eq!(off["auto-traverse-mounts"], "0");

        let plain = mask
            .resolve(&options(&[("allow_other", OptionValue::Bool(true))]))
            .unwrap();
        assert_eq!(plain["allow_other"], "true");
    }
}
