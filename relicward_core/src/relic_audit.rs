//! Audit trail: one structured event per security-relevant relic transition.

use crate::config::AuditConfig;
use crate::relic_store::{WriteHandle, WriteOp};
use crate::world::BlockPos;
use relicward_env::HolderRef;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Relic id recorded for confiscations of items that never had one.
pub const UNREGISTERED_ID: &str = "UNREGISTERED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    Issued,
    Crafted,
    Pickup,
    Drop,
    DeathDrop,
    ContainerPlace,
    ContainerBroken,
    ScanVerified,
    ScanMissing,
    Destroyed,
    Revoked,
    ClassChange,
    UnregisteredConfiscated,
    TamperedConfiscated,
    DupeConfiscated,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Issued => "ISSUED",
            AuditKind::Crafted => "CRAFTED",
            AuditKind::Pickup => "PICKUP",
            AuditKind::Drop => "DROP",
            AuditKind::DeathDrop => "DEATH_DROP",
            AuditKind::ContainerPlace => "CONTAINER_PLACE",
            AuditKind::ContainerBroken => "CONTAINER_BROKEN",
            AuditKind::ScanVerified => "SCAN_VERIFIED",
            AuditKind::ScanMissing => "SCAN_MISSING",
            AuditKind::Destroyed => "DESTROYED",
            AuditKind::Revoked => "REVOKED",
            AuditKind::ClassChange => "CLASS_CHANGE",
            AuditKind::UnregisteredConfiscated => "UNREGISTERED_CONFISCATED",
            AuditKind::TamperedConfiscated => "TAMPERED_CONFISCATED",
            AuditKind::DupeConfiscated => "DUPE_CONFISCATED",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub relic_id: String,
    /// Epoch seconds.
    pub at: i64,
    pub kind: AuditKind,
    pub detail: String,
    pub actor: Option<HolderRef>,
    pub position: Option<BlockPos>,
}

impl AuditEvent {
    pub fn new(relic_id: impl Into<String>, kind: AuditKind, at: i64) -> Self {
        Self {
            relic_id: relic_id.into(),
            at,
            kind,
            detail: String::new(),
            actor: None,
            position: None,
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn actor(mut self, actor: Option<&HolderRef>) -> Self {
        self.actor = actor.cloned();
        self
    }

    pub fn position(mut self, position: Option<&BlockPos>) -> Self {
        self.position = position.cloned();
        self
    }

    /// `[2024-01-01 00:00:00 UTC] [MC-0001] [PICKUP] alice@overworld(1,64,2) | detail`
    pub fn log_line(&self) -> String {
        let stamp = chrono::DateTime::from_timestamp(self.at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| self.at.to_string());
        let actor = self
            .actor
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or("(server)");
        let mut line = format!("[{} UTC] [{}] [{}] {}", stamp, self.relic_id, self.kind, actor);
        if let Some(pos) = &self.position {
            line.push_str(&format!("@{}", pos));
        }
        if !self.detail.is_empty() {
            line.push_str(" | ");
            line.push_str(&self.detail);
        }
        line
    }
}

/// Queues audit events for durable storage, the flat file and the log.
#[derive(Clone)]
pub struct AuditLog {
    writer: WriteHandle,
    keep: usize,
    log_file: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(writer: WriteHandle, config: &AuditConfig) -> Self {
        Self {
            writer,
            keep: config.max_history_per_relic,
            log_file: config.log_to_file.then(|| config.log_file.clone()),
        }
    }

    pub fn record(&self, event: AuditEvent) {
        info!(
            target: "relicward::audit",
            relic = %event.relic_id,
            kind = %event.kind,
            "{}",
            event.detail
        );
        if let Some(path) = &self.log_file {
            self.writer.submit(WriteOp::AuditLine {
                path: path.clone(),
                line: event.log_line(),
            });
        }
        let relic_id = event.relic_id.clone();
        self.writer.submit(WriteOp::Audit(event));
        if self.keep > 0 {
            self.writer.submit(WriteOp::Prune {
                relic_id,
                keep: self.keep,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relic_store::{MemoryRelicStore, RelicStore, WriteQueue};
    use relicward_env::HolderId;
    use std::time::Duration;

    #[test]
    fn test_log_line_format() {
        let alice = HolderRef::new(HolderId::from_seed(1), "alice");
        let event = AuditEvent::new("MC-0001", AuditKind::Pickup, 1_704_067_200)
            .detail("picked up")
            .actor(Some(&alice))
            .position(Some(&BlockPos::new("overworld", 1, 64, -2)));

        assert_eq!(
            event.log_line(),
            "[2024-01-01 00:00:00 UTC] [MC-0001] [PICKUP] alice@overworld(1,64,-2) | picked up"
        );
    }

    #[test]
    fn test_log_line_without_actor_or_position() {
        let event = AuditEvent::new("MC-0002", AuditKind::Destroyed, 1_704_067_200);
        assert_eq!(
            event.log_line(),
            "[2024-01-01 00:00:00 UTC] [MC-0002] [DESTROYED] (server)"
        );
    }

    #[test]
    fn test_record_persists_and_prunes() {
        let store = MemoryRelicStore::shared();
        let mut queue = WriteQueue::spawn(store.clone()).unwrap();
        let config = AuditConfig {
            max_history_per_relic: 2,
            log_to_file: false,
            ..AuditConfig::default()
        };
        let audit = AuditLog::new(queue.handle(), &config);

        for i in 0..5 {
            audit.record(AuditEvent::new("MC-0001", AuditKind::Pickup, i).detail(format!("e{}", i)));
        }
        assert!(queue.flush(Duration::from_secs(5)));

        let history = store.audit_history("MC-0001", 10).unwrap();
        let details: Vec<_> = history.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(details, vec!["e4", "e3"]);
        queue.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_record_appends_flat_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryRelicStore::shared();
        let mut queue = WriteQueue::spawn(store).unwrap();
        let config = AuditConfig {
            max_history_per_relic: 0,
            log_to_file: true,
            log_file: dir.path().join("audit.log"),
        };
        let audit = AuditLog::new(queue.handle(), &config);

        audit.record(AuditEvent::new("MC-0001", AuditKind::Revoked, 1_704_067_200));
        assert!(queue.shutdown(Duration::from_secs(5)));

        let contents = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        assert!(contents.contains("[MC-0001] [REVOKED]"));
    }
}
