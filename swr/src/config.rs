//! Loading cache settings from configuration files.
//!
//! Durations are written in `humantime` form (`"10s"`, `"24h"`, `"1m 30s"`).
//! A raw, deserialized [`CacheConfigRaw`] is validated into a
//! [`CacheConfig`], which deserializes directly as well:
//!
//! ```
//! use std::time::Duration;
//! use fibre_swr::config::CacheConfig;
//!
//! let config: CacheConfig = serde_json::from_str(r#"{
//!   "default_ttl": "1m",
//!   "tiers": { "final": "24h", "live": "10s" }
//! }"#).unwrap();
//!
//! assert_eq!(config.default_ttl, Some(Duration::from_secs(60)));
//! assert_eq!(config.tiers["live"], Duration::from_secs(10));
//! ```

use crate::builder::DEFAULT_TTL;
use crate::error::BuildError;
use crate::policy::TieredTtl;

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfigRaw {
  #[serde(default)]
  pub shards: Option<usize>,
  #[serde(default)]
  pub default_ttl: Option<String>,
  #[serde(default)]
  pub stale_hint: Option<String>,
  #[serde(default)] // Tiers can be empty
  pub tiers: HashMap<String, String>,
}

/// Validated cache settings. Apply them with
/// [`CacheBuilder::with_config`](crate::CacheBuilder::with_config).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "CacheConfigRaw")]
pub struct CacheConfig {
  pub shards: Option<usize>,
  pub default_ttl: Option<Duration>,
  pub stale_hint: Option<Duration>,
  pub tiers: HashMap<String, Duration>,
}

impl TryFrom<CacheConfigRaw> for CacheConfig {
  type Error = BuildError;

  fn try_from(raw: CacheConfigRaw) -> Result<Self, Self::Error> {
    if raw.shards == Some(0) {
      return Err(BuildError::InvalidConfig {
        field: "shards".to_string(),
        message: "must be at least 1".to_string(),
      });
    }

    let default_ttl = raw
      .default_ttl
      .as_deref()
      .map(|s| parse_duration("default_ttl", s))
      .transpose()?;
    let stale_hint = raw
      .stale_hint
      .as_deref()
      .map(|s| parse_duration("stale_hint", s))
      .transpose()?;

    let mut tiers = HashMap::with_capacity(raw.tiers.len());
    for (name, ttl) in raw.tiers {
      let ttl = parse_duration(&format!("tiers.{name}"), &ttl)?;
      tiers.insert(name, ttl);
    }

    Ok(CacheConfig {
      shards: raw.shards,
      default_ttl,
      stale_hint,
      tiers,
    })
  }
}

impl CacheConfig {
  /// Builds a [`TieredTtl`] from the configured tiers.
  ///
  /// `classify` names the tier of each value; values whose tier is not
  /// configured get `default_ttl` (or 60 seconds when that is unset).
  pub fn tiered_ttl<V, F>(&self, classify: F) -> TieredTtl<V, String>
  where
    F: Fn(&V) -> String + Send + Sync + 'static,
  {
    TieredTtl::new(classify, self.default_ttl.unwrap_or(DEFAULT_TTL))
      .tiers(self.tiers.iter().map(|(name, ttl)| (name.clone(), *ttl)))
  }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, BuildError> {
  humantime::parse_duration(value).map_err(|e| BuildError::InvalidConfig {
    field: field.to_string(),
    message: e.to_string(),
  })
}
