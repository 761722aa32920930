//! Runtime configuration.
//!
//! Every section has defaults, so an empty JSON object is a valid config file.

use crate::relic_identity::RelicClass;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Top-level Relicward configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelicConfig {
    /// Prefix of allocated ids ("MC" gives "MC-0001")
    pub id_prefix: String,

    pub capacity: CapacityConfig,
    pub scan: ScanConfig,
    pub notices: NoticeConfig,
    pub audit: AuditConfig,
    pub storage: StorageConfig,
}

impl Default for RelicConfig {
    fn default() -> Self {
        Self {
            id_prefix: "MC".to_string(),
            capacity: CapacityConfig::default(),
            scan: ScanConfig::default(),
            notices: NoticeConfig::default(),
            audit: AuditConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl RelicConfig {
    /// Loads and validates a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id_prefix.is_empty() || self.id_prefix.contains('-') {
            return Err(ConfigError::invalid("id_prefix must be non-empty and contain no '-'"));
        }
        if self.scan.interval_min_minutes == 0 {
            return Err(ConfigError::invalid("scan.interval_min_minutes must be at least 1"));
        }
        if self.scan.interval_min_minutes > self.scan.interval_max_minutes {
            return Err(ConfigError::invalid(
                "scan.interval_min_minutes exceeds scan.interval_max_minutes",
            ));
        }
        if self.scan.missed_scans_to_destroy == 0 {
            return Err(ConfigError::invalid("scan.missed_scans_to_destroy must be at least 1"));
        }
        if self.scan.regions_per_tick == 0 {
            return Err(ConfigError::invalid("scan.regions_per_tick must be at least 1"));
        }
        Ok(())
    }
}

/// Population caps per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Maximum active RESTRICTED relics
    pub restricted: usize,

    /// Maximum active UNRESTRICTED relics
    pub unrestricted: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            restricted: 4,
            unrestricted: 1,
        }
    }
}

impl CapacityConfig {
    pub fn of(&self, class: RelicClass) -> usize {
        match class {
            RelicClass::Restricted => self.restricted,
            RelicClass::Unrestricted => self.unrestricted,
        }
    }

    pub fn set(&mut self, class: RelicClass, cap: usize) {
        match class {
            RelicClass::Restricted => self.restricted = cap,
            RelicClass::Unrestricted => self.unrestricted = cap,
        }
    }
}

/// Reconciliation scanner tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Lower bound of the randomized interval between scans
    pub interval_min_minutes: u64,

    /// Upper bound of the randomized interval between scans
    pub interval_max_minutes: u64,

    /// Consecutive accessible misses before a relic is declared destroyed
    pub missed_scans_to_destroy: u32,

    /// Regions swept per scheduler tick during the spatial phase
    pub regions_per_tick: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_min_minutes: 120,
            interval_max_minutes: 360,
            missed_scans_to_destroy: 4,
            regions_per_tick: 50,
        }
    }
}

impl ScanConfig {
    /// Interval bounds in seconds.
    pub fn interval_bounds_secs(&self) -> (u64, u64) {
        (self.interval_min_minutes * 60, self.interval_max_minutes * 60)
    }
}

/// Operator and public notification toggles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoticeConfig {
    pub ops_on_issue: bool,
    pub ops_on_destroy: bool,
    pub ops_on_duplicate: bool,
    pub ops_on_scan_complete: bool,

    /// Broadcast to everyone when a relic is crafted
    pub public_on_issue: bool,

    /// Broadcast to everyone when a destroyed relic frees a slot
    pub public_on_slot_open: bool,

    /// Placeholders: {player} {class} {restricted_count} {restricted_max}
    /// {unrestricted_count} {unrestricted_max} {total_count} {total_max}
    pub public_issue_template: String,

    pub public_slot_open_template: String,
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            ops_on_issue: true,
            ops_on_destroy: true,
            ops_on_duplicate: true,
            ops_on_scan_complete: false,
            public_on_issue: true,
            public_on_slot_open: false,
            public_issue_template: "{player} has obtained a relic! ({restricted_count}/{restricted_max} restricted | {unrestricted_count}/{unrestricted_max} unrestricted)".to_string(),
            public_slot_open_template: "A {class} relic slot has opened! ({restricted_count}/{restricted_max} restricted | {unrestricted_count}/{unrestricted_max} unrestricted)".to_string(),
        }
    }
}

/// Audit trail settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Events kept per relic in the store (0 keeps everything)
    pub max_history_per_relic: usize,

    /// Also append one line per event to `log_file`
    pub log_to_file: bool,

    pub log_file: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_history_per_relic: 200,
            log_to_file: true,
            log_file: PathBuf::from("relic-audit.log"),
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Sled database directory
    pub db_path: PathBuf,

    /// Integrity secret file; kept apart from the database
    pub secret_path: PathBuf,

    /// How long shutdown waits for the writer queue to drain
    pub shutdown_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("relicward.db"),
            secret_path: PathBuf::from("integrity.key"),
            shutdown_timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelicConfig::default();
        assert_eq!(config.capacity.of(RelicClass::Restricted), 4);
        assert_eq!(config.capacity.of(RelicClass::Unrestricted), 1);
        assert_eq!(config.scan.interval_bounds_secs(), (7200, 21600));
        assert_eq!(config.scan.missed_scans_to_destroy, 4);
        assert_eq!(config.audit.max_history_per_relic, 200);
        assert!(config.notices.ops_on_duplicate);
        assert!(!config.notices.public_on_slot_open);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RelicConfig::from_json_str(
            r#"{ "capacity": { "restricted": 6 }, "scan": { "missed_scans_to_destroy": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.capacity.restricted, 6);
        assert_eq!(config.capacity.unrestricted, 1);
        assert_eq!(config.scan.missed_scans_to_destroy, 2);
        assert_eq!(config.scan.regions_per_tick, 50);
        assert_eq!(config.id_prefix, "MC");
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(matches!(
            RelicConfig::from_json_str(r#"{ "scan": { "interval_min_minutes": 500 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RelicConfig::from_json_str(r#"{ "id_prefix": "A-B" }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RelicConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relicward.json");
        std::fs::write(&path, r#"{ "id_prefix": "RL" }"#).unwrap();
        assert_eq!(RelicConfig::from_json_file(&path).unwrap().id_prefix, "RL");

        let missing = dir.path().join("absent.json");
        assert!(matches!(RelicConfig::from_json_file(&missing), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_capacity_set() {
        let mut capacity = CapacityConfig::default();
        capacity.set(RelicClass::Unrestricted, 3);
        assert_eq!(capacity.of(RelicClass::Unrestricted), 3);
    }
}
