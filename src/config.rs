use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::healer::{HealPolicy, ResidualHandling, TransferScope};
use crate::model::DEFAULT_LOW_STOCK_METERS;

/// Runtime settings, read from `SWATCH_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub wal_file: String,
    pub heal_interval: Duration,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub low_stock_meters: f64,
    pub heal: HealPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_file: "inventory.wal".into(),
            heal_interval: Duration::from_millis(5000),
            compact_threshold: 1000,
            metrics_port: None,
            low_stock_meters: DEFAULT_LOW_STOCK_METERS,
            heal: HealPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unreadable values keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let heal_defaults = defaults.heal.clone();

        let scope = parsed_with(&lookup, "SWATCH_HEAL_SCOPE", TransferScope::parse)
            .unwrap_or(heal_defaults.scope);
        let residual = parsed_with(&lookup, "SWATCH_HEAL_RESIDUAL", ResidualHandling::parse)
            .unwrap_or(heal_defaults.residual);

        Self {
            data_dir: lookup("SWATCH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            wal_file: lookup("SWATCH_WAL_FILE").unwrap_or(defaults.wal_file),
            heal_interval: parsed(&lookup, "SWATCH_HEAL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.heal_interval),
            compact_threshold: parsed(&lookup, "SWATCH_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "SWATCH_METRICS_PORT"),
            low_stock_meters: parsed::<f64>(&lookup, "SWATCH_LOW_STOCK_METERS")
                .filter(|m| m.is_finite() && *m >= 0.0)
                .unwrap_or(defaults.low_stock_meters),
            heal: HealPolicy {
                scope,
                residual,
                max_passes: parsed::<u32>(&lookup, "SWATCH_HEAL_MAX_PASSES")
                    .filter(|n| *n > 0)
                    .unwrap_or(heal_defaults.max_passes),
                max_conflict_retries: parsed(&lookup, "SWATCH_HEAL_CONFLICT_RETRIES")
                    .unwrap_or(heal_defaults.max_conflict_retries),
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal_file)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    parsed_with(lookup, key, |s| s.trim().parse().ok())
}

fn parsed_with<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let value = parse(&raw);
    if value.is_none() {
        tracing::warn!("ignoring {key}={raw:?}: not a valid value, using default");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.wal_path(), PathBuf::from("./data/inventory.wal"));
        assert_eq!(config.heal.max_passes, 1);
        assert_eq!(config.heal.scope, TransferScope::FollowingRolls);
    }

    #[test]
    fn reads_every_key() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("SWATCH_DATA_DIR", "/var/lib/swatch"),
            ("SWATCH_WAL_FILE", "rolls.wal"),
            ("SWATCH_HEAL_INTERVAL_MS", "250"),
            ("SWATCH_COMPACT_THRESHOLD", "50"),
            ("SWATCH_METRICS_PORT", "9464"),
            ("SWATCH_LOW_STOCK_METERS", "7.5"),
            ("SWATCH_HEAL_SCOPE", "same_article"),
            ("SWATCH_HEAL_RESIDUAL", "retain"),
            ("SWATCH_HEAL_MAX_PASSES", "8"),
            ("SWATCH_HEAL_CONFLICT_RETRIES", "0"),
        ]));

        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/swatch/rolls.wal"));
        assert_eq!(config.heal_interval, Duration::from_millis(250));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.metrics_port, Some(9464));
        assert_eq!(config.low_stock_meters, 7.5);
        assert_eq!(
            config.heal,
            HealPolicy {
                scope: TransferScope::SameArticle,
                residual: ResidualHandling::Retain,
                max_passes: 8,
                max_conflict_retries: 0,
            }
        );
    }

    #[test]
    fn bad_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("SWATCH_HEAL_INTERVAL_MS", "soon"),
            ("SWATCH_METRICS_PORT", "99999"),
            ("SWATCH_LOW_STOCK_METERS", "-3"),
            ("SWATCH_HEAL_SCOPE", "everywhere"),
            ("SWATCH_HEAL_MAX_PASSES", "0"),
        ]));
        assert_eq!(config, EngineConfig::default());
    }
}
