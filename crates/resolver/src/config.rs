//! Resolver configuration.
//!
//! Every field has a default, so an empty document is a valid config. Host
//! profiles and key sources listed here are added to (or replace, by name)
//! the built-in ones.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ResolveError;
use crate::extractor::HostProfile;
use crate::fetcher::DEFAULT_UA;
use crate::keys::KeySource;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    /// User agent sent with every request and attached to descriptors.
    pub user_agent: String,
    /// Per-request HTTP timeout (default: 30)
    pub request_timeout_secs: u64,
    /// Bound on a browser challenge solve (default: 30)
    pub challenge_timeout_secs: u64,
    /// FlareSolverr endpoint used for browser-grade challenge solves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flaresolverr_url: Option<String>,
    /// Remote key sources by site type.
    pub key_sources: BTreeMap<String, KeySource>,
    /// Extra host profiles, tried before the built-ins.
    pub hosts: Vec<HostProfile>,
    pub disable_builtin_hosts: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_UA.to_string(),
            request_timeout_secs: 30,
            challenge_timeout_secs: 30,
            flaresolverr_url: None,
            key_sources: BTreeMap::new(),
            hosts: Vec::new(),
            disable_builtin_hosts: false,
        }
    }
}

impl ResolverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.challenge_timeout_secs)
    }

    /// Apply a JSON overlay. Non-null overlay keys win.
    pub fn with_overrides(&self, overlay: Value) -> Result<Self, ResolveError> {
        let base = serde_json::to_value(self)?;
        let merged = merge_config_overrides(Some(base), Some(overlay)).unwrap_or(Value::Null);
        Ok(serde_json::from_value(merged)?)
    }
}

/// Shallow-merge two JSON objects; overlay keys with non-null values win.
/// If either side is not an object the overlay replaces the base.
pub fn merge_config_overrides(base: Option<Value>, overlay: Option<Value>) -> Option<Value> {
    match (base, overlay) {
        (None, None) => None,
        (Some(b), None) => Some(b),
        (None, Some(o)) => Some(o),
        (Some(Value::Object(mut base_map)), Some(Value::Object(overlay_map))) => {
            for (k, v) in overlay_map {
                if !v.is_null() {
                    base_map.insert(k, v);
                }
            }
            Some(Value::Object(base_map))
        }
        (_, Some(o)) => Some(o),
    }
}
