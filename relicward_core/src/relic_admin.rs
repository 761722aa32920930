//! Operator actions on existing relics: revoke, reclass, mark destroyed.

use crate::config::{CapacityConfig, NoticeConfig};
use crate::notify::{announce_slot_open, Notifier};
use crate::relic_audit::{AuditEvent, AuditKind, AuditLog};
use crate::relic_identity::{RelicClass, RelicIdentity};
use crate::relic_registry::{Registry, RelicRecord, RelicStatus};
use crate::world::{collect_relics, BlockPos, FoundRelic, InventoryRef, WorldAccess};
use relicward_env::HolderRef;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("Unknown relic: {0}")]
    UnknownRelic(String),

    #[error("Relic {id} is {status}, not active")]
    NotActive { id: String, status: RelicStatus },

    #[error("{class} capacity reached ({active}/{capacity})")]
    CapacityReached {
        class: RelicClass,
        active: usize,
        capacity: usize,
    },
}

/// What happened to the physical item of a revoked relic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// Found and removed now.
    Removed,
    /// Holder offline; removed when they reconnect.
    Deferred,
    /// Not found; any copy met later is confiscated as a duplicate.
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclassOutcome {
    Unchanged,
    /// Registry and the physical stamp both updated.
    Restamped,
    /// Registry updated; the item could not be reached to re-sign it.
    RecordOnly,
}

/// Locates the physical copy of `record` through its recorded location.
pub fn find_relic(world: &dyn WorldAccess, record: &RelicRecord) -> Option<FoundRelic> {
    let id = record.id.as_str();
    let matching = |found: &FoundRelic| found.item.relic_id() == Some(id);

    if record.location.kind.is_holder_bound() {
        let holder = world.holder(record.location.holder_id()?)?;
        return holder
            .inventories()
            .into_iter()
            .flat_map(|(handle, slots)| collect_relics(&slots, &handle.reference))
            .find(matching);
    }

    if let Some(position) = record.location.position() {
        let block = InventoryRef::Block(position);
        if let Some(slots) = world.contents(&block) {
            if let Some(found) = collect_relics(&slots, &block).into_iter().find(matching) {
                return Some(found);
            }
        }
    }
    // Loose items drift; check every loaded entity.
    world.free_entities().into_iter().find_map(|entity| {
        collect_relics(&entity.contents, &InventoryRef::Entity(entity.id))
            .into_iter()
            .find(matching)
    })
}

pub struct Admin {
    identity: Arc<RelicIdentity>,
    audit: AuditLog,
    notifier: Arc<dyn Notifier>,
    notices: NoticeConfig,
}

impl Admin {
    pub fn new(
        identity: Arc<RelicIdentity>,
        audit: AuditLog,
        notifier: Arc<dyn Notifier>,
        notices: NoticeConfig,
    ) -> Self {
        Self {
            identity,
            audit,
            notifier,
            notices,
        }
    }

    fn active_record<'r>(registry: &'r Registry, id: &str) -> Result<&'r RelicRecord, AdminError> {
        let record = registry
            .get(id)
            .ok_or_else(|| AdminError::UnknownRelic(id.to_string()))?;
        if !record.is_active() {
            return Err(AdminError::NotActive {
                id: id.to_string(),
                status: record.status,
            });
        }
        Ok(record)
    }

    /// Revokes an active relic and removes its physical copy where possible.
    pub fn revoke(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        id: &str,
        operator: Option<&HolderRef>,
        reason: &str,
        now: i64,
    ) -> Result<RevokeOutcome, AdminError> {
        let record = Self::active_record(registry, id)?.clone();
        let offline_holder = record
            .location
            .holder_id()
            .filter(|h| record.location.kind.is_holder_bound() && !world.is_connected(*h));

        let outcome = if let Some(holder) = offline_holder {
            registry.queue_deferred_revocation(holder, id);
            RevokeOutcome::Deferred
        } else {
            let removed = find_relic(&*world, &record)
                .map_or(false, |found| found.site.remove(world, |item| item.relic_id() == Some(id)));
            if removed {
                RevokeOutcome::Removed
            } else {
                RevokeOutcome::NotFound
            }
        };

        registry.set_status(id, RelicStatus::Revoked);
        let detail = format!("Revoked ({:?}): {}", outcome, reason);
        warn!("Relic {} revoked: {:?}, {}", id, outcome, reason);
        self.audit.record(
            AuditEvent::new(id, AuditKind::Revoked, now)
                .detail(detail)
                .actor(operator)
                .position(record.location.position().as_ref()),
        );
        self.notifier.ops_alert(&format!(
            "[Relicward] Relic {} revoked by {}: {}",
            id,
            operator.map(|o| o.name.as_str()).unwrap_or("console"),
            reason
        ));
        Ok(outcome)
    }

    /// Moves an active relic to another class, subject to that class's cap.
    #[allow(clippy::too_many_arguments)]
    pub fn set_class(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        capacity: &CapacityConfig,
        id: &str,
        class: RelicClass,
        operator: Option<&HolderRef>,
        now: i64,
    ) -> Result<ReclassOutcome, AdminError> {
        let record = Self::active_record(registry, id)?.clone();
        if record.class == class {
            return Ok(ReclassOutcome::Unchanged);
        }
        let active = registry.active_count(class);
        if active >= capacity.of(class) {
            return Err(AdminError::CapacityReached {
                class,
                active,
                capacity: capacity.of(class),
            });
        }

        let restamped = find_relic(&*world, &record).map_or(false, |found| {
            let mut item = found.item.clone();
            if !self.identity.reclass(&mut item, class) {
                return false;
            }
            match found.site.as_slot() {
                Some((inventory, slot)) => world.replace_slot(&inventory, slot, item),
                None => false,
            }
        });

        registry.set_class(id, class);
        let outcome = if restamped {
            ReclassOutcome::Restamped
        } else {
            warn!("Relic {} reclassed in the registry only; item not reachable", id);
            ReclassOutcome::RecordOnly
        };
        self.audit.record(
            AuditEvent::new(id, AuditKind::ClassChange, now)
                .detail(format!("{} -> {} ({:?})", record.class, class, outcome))
                .actor(operator)
                .position(record.location.position().as_ref()),
        );
        info!("Relic {} reclassed {} -> {}", id, record.class, class);
        announce_slot_open(
            self.notifier.as_ref(),
            &self.notices,
            registry,
            capacity,
            record.class,
        );
        Ok(outcome)
    }

    /// Records the destruction of an active relic (lava, void, despawn...).
    pub fn mark_destroyed(
        &self,
        registry: &mut Registry,
        capacity: &CapacityConfig,
        id: &str,
        cause: &str,
        position: Option<&BlockPos>,
        now: i64,
    ) -> Result<(), AdminError> {
        let class = Self::active_record(registry, id)?.class;
        registry.set_status(id, RelicStatus::Destroyed);
        warn!("Relic {} destroyed: {}", id, cause);
        self.audit.record(
            AuditEvent::new(id, AuditKind::Destroyed, now)
                .detail(cause)
                .position(position),
        );
        if self.notices.ops_on_destroy {
            self.notifier.ops_alert(&format!(
                "[Relicward] {} relic {} destroyed: {}",
                class, id, cause
            ));
        }
        announce_slot_open(self.notifier.as_ref(), &self.notices, registry, capacity, class);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::notify::RecordingNotifier;
    use crate::relic_identity::{IntegritySecret, SECRET_LEN};
    use crate::relic_registry::{LocationKind, Placement};
    use crate::relic_store::WriteHandle;
    use crate::world::{ContainerKind, ItemStack};
    use crate::world_memory::MemoryWorld;
    use relicward_env::HolderId;

    struct Fixture {
        admin: Admin,
        identity: Arc<RelicIdentity>,
        notifier: Arc<RecordingNotifier>,
        registry: Registry,
        world: MemoryWorld,
        alice: HolderRef,
    }

    fn pos(x: i32) -> BlockPos {
        BlockPos::new("overworld", x, 64, 0)
    }

    fn fixture() -> Fixture {
        let identity =
            Arc::new(RelicIdentity::new(&IntegritySecret::from_bytes([6; SECRET_LEN])).unwrap());
        let audit = AuditLog::new(
            WriteHandle::disconnected(),
            &AuditConfig {
                log_to_file: false,
                ..AuditConfig::default()
            },
        );
        let notifier = Arc::new(RecordingNotifier::new());
        let notices = NoticeConfig {
            public_on_slot_open: true,
            ..NoticeConfig::default()
        };
        let alice = HolderRef::new(HolderId::from_seed(1), "alice");
        let mut world = MemoryWorld::new();
        world.connect(alice.clone(), pos(0));
        Fixture {
            admin: Admin::new(identity.clone(), audit, notifier.clone(), notices),
            identity,
            notifier,
            registry: Registry::new("MC", WriteHandle::disconnected()),
            world,
            alice,
        }
    }

    impl Fixture {
        fn issue_held(&mut self) -> ItemStack {
            let id = self.registry.allocate_id();
            let mut item = ItemStack::blank_relic();
            self.identity.stamp(&mut item, &id, RelicClass::Restricted, 1);
            let placement = Placement::new(LocationKind::HeldInventory, pos(0))
                .with_holder(Some(self.alice.clone()));
            self.registry
                .register(RelicRecord::issued(&id, RelicClass::Restricted, 1, None, &placement))
                .unwrap();
            self.world.give(self.alice.id, item.clone());
            item
        }
    }

    #[test]
    fn test_revoke_online_removes_item() {
        let mut fx = fixture();
        let item = fx.issue_held();
        let id = item.relic_id().unwrap();

        let outcome = fx
            .admin
            .revoke(&mut fx.registry, &mut fx.world, id, None, "exploit", 10)
            .unwrap();
        assert_eq!(outcome, RevokeOutcome::Removed);
        assert_eq!(fx.world.count_relic(id), 0);
        assert_eq!(fx.registry.get(id).unwrap().status, RelicStatus::Revoked);
        assert!(fx.notifier.ops_alerts()[0].contains("revoked by console"));
    }

    #[test]
    fn test_revoke_offline_is_deferred() {
        let mut fx = fixture();
        let item = fx.issue_held();
        let id = item.relic_id().unwrap();
        fx.world.disconnect(fx.alice.id);

        let outcome = fx
            .admin
            .revoke(&mut fx.registry, &mut fx.world, id, None, "exploit", 10)
            .unwrap();
        assert_eq!(outcome, RevokeOutcome::Deferred);
        assert_eq!(fx.world.count_relic(id), 1);
        assert!(fx.registry.has_deferred_revocations(fx.alice.id));
    }

    #[test]
    fn test_revoke_rejects_dead_and_unknown() {
        let mut fx = fixture();
        let item = fx.issue_held();
        let id = item.relic_id().unwrap();
        fx.registry.set_status(id, RelicStatus::Destroyed);

        assert_eq!(
            fx.admin
                .revoke(&mut fx.registry, &mut fx.world, id, None, "x", 1)
                .unwrap_err(),
            AdminError::NotActive {
                id: id.to_string(),
                status: RelicStatus::Destroyed
            }
        );
        assert_eq!(
            fx.admin
                .revoke(&mut fx.registry, &mut fx.world, "MC-0404", None, "x", 1)
                .unwrap_err(),
            AdminError::UnknownRelic("MC-0404".to_string())
        );
    }

    #[test]
    fn test_set_class_restamps_item() {
        let mut fx = fixture();
        let item = fx.issue_held();
        let id = item.relic_id().unwrap();
        let capacity = CapacityConfig::default();

        let outcome = fx
            .admin
            .set_class(&mut fx.registry, &mut fx.world, &capacity, id, RelicClass::Unrestricted, None, 5)
            .unwrap();
        assert_eq!(outcome, ReclassOutcome::Restamped);
        assert_eq!(fx.registry.get(id).unwrap().class, RelicClass::Unrestricted);

        let found = find_relic(&fx.world, fx.registry.get(id).unwrap()).unwrap();
        assert!(fx.identity.verify(&found.item));
        assert_eq!(RelicIdentity::class_of(&found.item), Some(RelicClass::Unrestricted));
        assert!(fx.notifier.broadcasts()[0].contains("Restricted relic slot has opened"));
    }

    #[test]
    fn test_set_class_respects_target_cap() {
        let mut fx = fixture();
        let first = fx.issue_held();
        let second = fx.issue_held();
        let capacity = CapacityConfig::default();

        fx.admin
            .set_class(
                &mut fx.registry,
                &mut fx.world,
                &capacity,
                first.relic_id().unwrap(),
                RelicClass::Unrestricted,
                None,
                5,
            )
            .unwrap();
        let err = fx
            .admin
            .set_class(
                &mut fx.registry,
                &mut fx.world,
                &capacity,
                second.relic_id().unwrap(),
                RelicClass::Unrestricted,
                None,
                6,
            )
            .unwrap_err();
        assert!(matches!(err, AdminError::CapacityReached { .. }));
        assert_eq!(
            fx.admin
                .set_class(
                    &mut fx.registry,
                    &mut fx.world,
                    &capacity,
                    second.relic_id().unwrap(),
                    RelicClass::Restricted,
                    None,
                    7,
                )
                .unwrap(),
            ReclassOutcome::Unchanged
        );
    }

    #[test]
    fn test_find_relic_in_container() {
        let mut fx = fixture();
        let item = fx.issue_held();
        let id = item.relic_id().unwrap().to_string();
        fx.world.place_container(pos(4), ContainerKind::Chest);
        fx.world
            .take_slot(&InventoryRef::Primary(fx.alice.id), 0)
            .unwrap();
        fx.world.put(&pos(4), item);
        fx.registry
            .update_location(&id, &Placement::new(LocationKind::Container, pos(4)), 3);

        let found = find_relic(&fx.world, fx.registry.get(&id).unwrap()).unwrap();
        assert_eq!(found.site, crate::world::Site::slot(InventoryRef::Block(pos(4)), 0));
    }

    #[test]
    fn test_mark_destroyed() {
        let mut fx = fixture();
        let item = fx.issue_held();
        let id = item.relic_id().unwrap();
        let capacity = CapacityConfig::default();

        fx.admin
            .mark_destroyed(&mut fx.registry, &capacity, id, "Fell into lava", Some(&pos(0)), 9)
            .unwrap();
        assert_eq!(fx.registry.get(id).unwrap().status, RelicStatus::Destroyed);
        assert!(fx.notifier.ops_alerts()[0].contains("Fell into lava"));
        assert!(fx
            .admin
            .mark_destroyed(&mut fx.registry, &capacity, id, "again", None, 10)
            .is_err());
    }
}
