//! The "TRACKER" - keeps recorded locations current from world events
//!
//! Every movement-relevant event is screened by the detector first; only
//! legitimate relics have their location updated. Movement events that can
//! still be refused report [`Disposition::Cancel`] when a relic was
//! confiscated, so the host aborts the move.
//!
//! Location rules:
//!
//! | Destination                      | Recorded as                   |
//! |----------------------------------|-------------------------------|
//! | holder primary store / cursor    | HELD_INVENTORY (holder)       |
//! | holder personal store            | PERSONAL_STORE (holder)       |
//! | workstation                      | HELD_INVENTORY (actor)        |
//! | chest / barrel / other block     | CONTAINER at canonical pos    |
//! | hopper / dropper / dispenser     | that kind at its pos          |
//! | vehicle chest / vehicle hopper   | that kind at vehicle pos      |
//! | inside a nested container item   | NESTED_BOX / POUCH            |

use crate::relic_audit::{AuditEvent, AuditKind, AuditLog};
use crate::relic_detector::{Detector, Encounter, Verdict};
use crate::relic_registry::{LocationKind, Placement, Registry};
use crate::world::{
    collect_relics, BlockPos, ContainerKind, EntityId, FoundRelic, InventoryHandle, InventoryRef,
    ItemStack, Material, Site, Slots, WorldAccess,
};
use relicward_env::{HolderId, HolderRef};
use tracing::{debug, info, warn};

/// What the host should do with the triggering action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Proceed,
    Cancel,
}

/// Whoever picked an item up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Picker {
    Holder(HolderRef),
    /// A non-holder creature, by kind name.
    Creature(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTarget {
    Cursor,
    Inventory(InventoryHandle),
}

/// Movement-relevant world events.
#[derive(Debug, Clone)]
pub enum WorldEvent {
    Pickup {
        picker: Picker,
        entity: EntityId,
        item: ItemStack,
        item_pos: BlockPos,
        picker_pos: BlockPos,
    },
    Drop {
        actor: HolderRef,
        entity: EntityId,
        item: ItemStack,
        position: BlockPos,
    },
    /// A holder moving an item between slots. Fired before the move.
    SlotMove {
        actor: HolderRef,
        actor_pos: BlockPos,
        item: ItemStack,
        source: Option<InventoryHandle>,
        source_slot: Option<usize>,
        destination: MoveTarget,
    },
    /// Hopper-style transfer between inventories. Fired before the move.
    AutomationMove {
        item: ItemStack,
        source: InventoryHandle,
        destination: InventoryHandle,
    },
    InventoryClose {
        actor: HolderRef,
        inventory: InventoryHandle,
    },
    Death {
        holder: HolderRef,
        position: BlockPos,
        /// Spawned drop entities and their stacks.
        drops: Vec<(EntityId, ItemStack)>,
    },
    Connect {
        holder: HolderId,
    },
    Disconnect {
        holder: HolderId,
    },
    Dispense {
        item: ItemStack,
        source: BlockPos,
    },
    MountPlace {
        actor: HolderRef,
        mount: EntityId,
        item: ItemStack,
        position: BlockPos,
    },
    MountBreak {
        item: ItemStack,
        position: BlockPos,
    },
    ContainerBroken {
        actor: Option<HolderRef>,
        position: BlockPos,
    },
    /// Two dropped stacks about to merge.
    Merge {
        item: ItemStack,
        target: ItemStack,
    },
}

impl WorldEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorldEvent::Pickup { .. } => "pickup",
            WorldEvent::Drop { .. } => "drop",
            WorldEvent::SlotMove { .. } => "slot_move",
            WorldEvent::AutomationMove { .. } => "automation_move",
            WorldEvent::InventoryClose { .. } => "inventory_close",
            WorldEvent::Death { .. } => "death",
            WorldEvent::Connect { .. } => "connect",
            WorldEvent::Disconnect { .. } => "disconnect",
            WorldEvent::Dispense { .. } => "dispense",
            WorldEvent::MountPlace { .. } => "mount_place",
            WorldEvent::MountBreak { .. } => "mount_break",
            WorldEvent::ContainerBroken { .. } => "container_broken",
            WorldEvent::Merge { .. } => "merge",
        }
    }
}

/// Location of an item placed in `handle`.
///
/// Workstations count as held by `actor`, since their contents return to the
/// actor when the interface closes.
pub fn classify(handle: &InventoryHandle, actor: Option<&HolderRef>) -> Placement {
    let position = handle.location_key().clone();
    let label = handle.kind.label();
    let (kind, holder) = match &handle.kind {
        ContainerKind::PlayerInventory => (LocationKind::HeldInventory, handle.holder.clone()),
        ContainerKind::PersonalStore => (LocationKind::PersonalStore, handle.holder.clone()),
        ContainerKind::Workstation(_) => (
            LocationKind::HeldInventory,
            actor.cloned().or_else(|| handle.holder.clone()),
        ),
        ContainerKind::Hopper => (LocationKind::Hopper, None),
        ContainerKind::Dropper => (LocationKind::Dropper, None),
        ContainerKind::Dispenser => (LocationKind::Dispenser, None),
        ContainerKind::VehicleChest => (LocationKind::VehicleChest, None),
        ContainerKind::VehicleHopper => (LocationKind::VehicleHopper, None),
        ContainerKind::Chest | ContainerKind::Barrel | ContainerKind::Other(_) => {
            (LocationKind::Container, None)
        }
    };
    Placement::new(kind, position)
        .with_holder(holder)
        .with_container(label)
}

/// Location of a relic found inside a nested container item.
pub fn nested_placement(outer: &Placement, material: &Material) -> Placement {
    let kind = match material {
        Material::NestedBox => LocationKind::NestedBox,
        Material::Pouch => LocationKind::Pouch,
        _ => return outer.clone(),
    };
    let mut placement = outer.clone();
    placement.kind = kind;
    placement.container = Some(kind.as_str().to_string());
    placement
}

/// Placement of a found relic, given the placement of its inventory.
pub fn placement_of(found: &FoundRelic, outer: &Placement) -> Placement {
    match &found.nested_in {
        Some(material) => nested_placement(outer, material),
        None => outer.clone(),
    }
}

/// Handles world events against the registry.
#[derive(Clone)]
pub struct Tracker {
    detector: Detector,
    audit: AuditLog,
}

impl Tracker {
    pub fn new(detector: Detector, audit: AuditLog) -> Self {
        Self { detector, audit }
    }

    pub fn handle(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        event: WorldEvent,
        now: i64,
    ) -> Disposition {
        debug!("Tracker event: {}", event.name());
        match event {
            WorldEvent::Pickup {
                picker,
                entity,
                item,
                item_pos,
                picker_pos,
            } => self.on_pickup(registry, world, picker, entity, &item, &item_pos, picker_pos, now),
            WorldEvent::Drop {
                actor,
                entity,
                item,
                position,
            } => self.on_drop(registry, world, &actor, entity, &item, position, now),
            WorldEvent::SlotMove {
                actor,
                actor_pos,
                item,
                source,
                source_slot,
                destination,
            } => self.on_slot_move(
                registry,
                world,
                &actor,
                actor_pos,
                &item,
                source,
                source_slot,
                destination,
                now,
            ),
            WorldEvent::AutomationMove {
                item,
                source,
                destination,
            } => self.on_automation_move(registry, world, &item, &source, &destination, now),
            WorldEvent::InventoryClose { actor, inventory } => {
                self.on_inventory_close(registry, world, &actor, &inventory, now)
            }
            WorldEvent::Death {
                holder,
                position,
                drops,
            } => self.on_death(registry, world, &holder, &position, drops, now),
            WorldEvent::Connect { holder } => self.on_connect(registry, world, holder, now),
            WorldEvent::Disconnect { holder } => self.on_disconnect(registry, world, holder, now),
            WorldEvent::Dispense { item, source } => self.on_dispense(registry, &item, source, now),
            WorldEvent::MountPlace {
                actor,
                mount,
                item,
                position,
            } => self.on_mount_place(registry, world, &actor, mount, &item, position, now),
            WorldEvent::MountBreak { item, position } => {
                self.on_mount_break(registry, &item, position, now)
            }
            WorldEvent::ContainerBroken { actor, position } => {
                self.on_container_broken(registry, actor.as_ref(), position, now)
            }
            WorldEvent::Merge { item, target } => {
                if item.is_relic() || target.is_relic() {
                    Disposition::Cancel
                } else {
                    Disposition::Proceed
                }
            }
        }
    }

    /// Screens one relic and, if it survives, records it at `placement`.
    #[allow(clippy::too_many_arguments)]
    fn observe(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        item: &ItemStack,
        holder: Option<&HolderRef>,
        placement: &Placement,
        site: Site,
        now: i64,
    ) -> Verdict {
        let encounter = Encounter {
            item,
            holder,
            found_at: &placement.position,
            site,
        };
        let verdict = self.detector.screen(registry, world, &encounter, now);
        if verdict.is_legitimate() {
            if let Some(id) = item.relic_id() {
                registry.update_location(id, placement, now);
            }
        }
        verdict
    }

    /// Screens every relic in `slots` (nested ones included) as placed at `outer`.
    #[allow(clippy::too_many_arguments)]
    fn observe_all(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        slots: &Slots,
        inventory: &InventoryRef,
        outer: &Placement,
        holder: Option<&HolderRef>,
        now: i64,
    ) {
        for found in collect_relics(slots, inventory) {
            let placement = placement_of(&found, outer);
            self.observe(registry, world, &found.item, holder, &placement, found.site, now);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_pickup(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        picker: Picker,
        entity: EntityId,
        item: &ItemStack,
        item_pos: &BlockPos,
        picker_pos: BlockPos,
        now: i64,
    ) -> Disposition {
        if !item.is_relic() {
            return Disposition::Proceed;
        }
        let holder = match &picker {
            Picker::Holder(holder) => Some(holder),
            Picker::Creature(_) => None,
        };
        let encounter = Encounter {
            item,
            holder,
            found_at: item_pos,
            site: Site::Entity(entity),
        };
        if !self.detector.screen(registry, world, &encounter, now).is_legitimate() {
            return Disposition::Cancel;
        }

        let placement = match &picker {
            Picker::Holder(holder) => Placement::new(LocationKind::HeldInventory, picker_pos)
                .with_holder(Some(holder.clone()))
                .with_container(ContainerKind::PlayerInventory.label()),
            Picker::Creature(kind) => {
                Placement::new(LocationKind::Unknown, picker_pos).with_container(kind.to_uppercase())
            }
        };
        if let Some(id) = item.relic_id() {
            registry.update_location(id, &placement, now);
            let who = match &picker {
                Picker::Holder(holder) => holder.name.clone(),
                Picker::Creature(kind) => kind.clone(),
            };
            self.audit.record(
                AuditEvent::new(id, AuditKind::Pickup, now)
                    .detail(format!("Picked up by {}", who))
                    .actor(holder)
                    .position(Some(&placement.position)),
            );
        }
        Disposition::Proceed
    }

    /// The drop already happened; a confiscation removes the new entity.
    #[allow(clippy::too_many_arguments)]
    fn on_drop(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        actor: &HolderRef,
        entity: EntityId,
        item: &ItemStack,
        position: BlockPos,
        now: i64,
    ) -> Disposition {
        if !item.is_relic() {
            return Disposition::Proceed;
        }
        let placement = Placement::new(LocationKind::GroundEntity, position);
        let verdict = self.observe(
            registry,
            world,
            item,
            Some(actor),
            &placement,
            Site::Entity(entity),
            now,
        );
        if let (true, Some(id)) = (verdict.is_legitimate(), item.relic_id()) {
            self.audit.record(
                AuditEvent::new(id, AuditKind::Drop, now)
                    .actor(Some(actor))
                    .position(Some(&placement.position)),
            );
        }
        Disposition::Proceed
    }

    #[allow(clippy::too_many_arguments)]
    fn on_slot_move(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        actor: &HolderRef,
        actor_pos: BlockPos,
        item: &ItemStack,
        source: Option<InventoryHandle>,
        source_slot: Option<usize>,
        destination: MoveTarget,
        now: i64,
    ) -> Disposition {
        if !item.is_relic() {
            return Disposition::Proceed;
        }
        let found_at = source
            .as_ref()
            .map(|h| h.location_key().clone())
            .unwrap_or_else(|| actor_pos.clone());
        let site = match (source, source_slot) {
            (Some(handle), Some(slot)) => Site::slot(handle.reference, slot),
            (Some(handle), None) => Site::Inventory(handle.reference),
            (None, _) => Site::Inventory(InventoryRef::Cursor(actor.id)),
        };
        let encounter = Encounter {
            item,
            holder: Some(actor),
            found_at: &found_at,
            site,
        };
        if !self.detector.screen(registry, world, &encounter, now).is_legitimate() {
            return Disposition::Cancel;
        }

        let placement = match &destination {
            MoveTarget::Cursor => Placement::new(LocationKind::HeldInventory, actor_pos)
                .with_holder(Some(actor.clone()))
                .with_container("CURSOR"),
            MoveTarget::Inventory(handle) => classify(handle, Some(actor)),
        };
        if let Some(id) = item.relic_id() {
            registry.update_location(id, &placement, now);
            if !placement.kind.is_holder_bound() {
                self.audit.record(
                    AuditEvent::new(id, AuditKind::ContainerPlace, now)
                        .detail(format!("Placed in {}", placement.container.as_deref().unwrap_or("?")))
                        .actor(Some(actor))
                        .position(Some(&placement.position)),
                );
            }
        }
        Disposition::Proceed
    }

    fn on_automation_move(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        item: &ItemStack,
        source: &InventoryHandle,
        destination: &InventoryHandle,
        now: i64,
    ) -> Disposition {
        if !item.is_relic() {
            return Disposition::Proceed;
        }
        let encounter = Encounter {
            item,
            holder: source.holder.as_ref(),
            found_at: source.location_key(),
            site: Site::Inventory(source.reference.clone()),
        };
        if !self.detector.screen(registry, world, &encounter, now).is_legitimate() {
            return Disposition::Cancel;
        }
        if let Some(id) = item.relic_id() {
            registry.update_location(id, &classify(destination, None), now);
        }
        Disposition::Proceed
    }

    /// Final authoritative sweep of an inventory the actor just closed.
    fn on_inventory_close(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        actor: &HolderRef,
        inventory: &InventoryHandle,
        now: i64,
    ) -> Disposition {
        // The holder's own store and workstation previews are covered elsewhere.
        if inventory.kind == ContainerKind::PlayerInventory || inventory.kind.is_workstation() {
            return Disposition::Proceed;
        }
        let Some(contents) = world.contents(&inventory.reference) else {
            return Disposition::Proceed;
        };
        let placement = classify(inventory, Some(actor));
        let holder = placement.holder.clone();
        self.observe_all(
            registry,
            world,
            &contents,
            &inventory.reference,
            &placement,
            holder.as_ref(),
            now,
        );
        Disposition::Proceed
    }

    fn on_death(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        holder: &HolderRef,
        position: &BlockPos,
        drops: Vec<(EntityId, ItemStack)>,
        now: i64,
    ) -> Disposition {
        let placement = Placement::new(LocationKind::GroundEntity, position.clone());
        for (entity, item) in drops.iter().filter(|(_, item)| item.is_relic()) {
            let verdict = self.observe(
                registry,
                world,
                item,
                Some(holder),
                &placement,
                Site::Entity(*entity),
                now,
            );
            if let (true, Some(id)) = (verdict.is_legitimate(), item.relic_id()) {
                self.audit.record(
                    AuditEvent::new(id, AuditKind::DeathDrop, now)
                        .detail(format!("Dropped on death of {}", holder.name))
                        .actor(Some(holder))
                        .position(Some(position)),
                );
            }
        }
        Disposition::Proceed
    }

    /// Applies deferred revocations, then re-validates everything the holder carries.
    fn on_connect(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        holder: HolderId,
        now: i64,
    ) -> Disposition {
        let Some(snapshot) = world.holder(holder) else {
            warn!("Connect for unknown holder {}", holder);
            return Disposition::Proceed;
        };

        for relic_id in registry.pop_deferred_revocations(holder) {
            let removed = snapshot.inventories().into_iter().any(|(handle, slots)| {
                collect_relics(&slots, &handle.reference)
                    .into_iter()
                    .filter(|found| found.item.relic_id() == Some(relic_id.as_str()))
                    .any(|found| {
                        found
                            .site
                            .remove(world, |item| item.relic_id() == Some(relic_id.as_str()))
                    })
            });
            let detail = if removed {
                "Deferred revocation applied on reconnect"
            } else {
                "Deferred revocation: item no longer carried"
            };
            info!("{} for {} ({})", detail, snapshot.holder.name, relic_id);
            self.audit.record(
                AuditEvent::new(&relic_id, AuditKind::Revoked, now)
                    .detail(detail)
                    .actor(Some(&snapshot.holder))
                    .position(Some(&snapshot.position)),
            );
        }

        let Some(snapshot) = world.holder(holder) else {
            return Disposition::Proceed;
        };
        for (handle, slots) in snapshot.inventories() {
            let placement = match handle.reference {
                InventoryRef::Cursor(_) => classify(&handle, None).with_container("CURSOR"),
                _ => classify(&handle, None),
            };
            self.observe_all(
                registry,
                world,
                &slots,
                &handle.reference,
                &placement,
                Some(&snapshot.holder),
                now,
            );
        }
        Disposition::Proceed
    }

    /// Everything the holder legitimately carries becomes OFFLINE_HOLDER.
    ///
    /// Copies are screened first; a forgery never claims an offline record.
    fn on_disconnect(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        holder: HolderId,
        now: i64,
    ) -> Disposition {
        let Some(snapshot) = world.holder(holder) else {
            return Disposition::Proceed;
        };
        let placement = Placement::new(LocationKind::OfflineHolder, snapshot.position.clone())
            .with_holder(Some(snapshot.holder.clone()));
        let mut marked = 0;
        for (handle, slots) in snapshot.inventories() {
            let offline = placement.clone().with_container(handle.kind.label());
            for found in collect_relics(&slots, &handle.reference) {
                let verdict = self.observe(
                    registry,
                    world,
                    &found.item,
                    Some(&snapshot.holder),
                    &offline,
                    found.site,
                    now,
                );
                if verdict.is_legitimate() {
                    marked += 1;
                }
            }
        }
        if marked > 0 {
            debug!("{} went offline holding {} relic(s)", snapshot.holder.name, marked);
        }
        Disposition::Proceed
    }

    /// The dispensed stack has no entity handle yet; it is screened on pickup.
    fn on_dispense(
        &self,
        registry: &mut Registry,
        item: &ItemStack,
        source: BlockPos,
        now: i64,
    ) -> Disposition {
        let Some(id) = item.relic_id() else {
            return Disposition::Proceed;
        };
        if self.detector.evaluate(registry, item, None, &source).is_legitimate() {
            let placement = Placement::new(LocationKind::GroundEntity, source)
                .with_container(ContainerKind::Dispenser.label());
            registry.update_location(id, &placement, now);
        }
        Disposition::Proceed
    }

    #[allow(clippy::too_many_arguments)]
    fn on_mount_place(
        &self,
        registry: &mut Registry,
        world: &mut dyn WorldAccess,
        actor: &HolderRef,
        mount: EntityId,
        item: &ItemStack,
        position: BlockPos,
        now: i64,
    ) -> Disposition {
        if !item.is_relic() {
            return Disposition::Proceed;
        }
        let placement = Placement::new(LocationKind::DisplayMount, position)
            .with_container(LocationKind::DisplayMount.as_str());
        let verdict = self.observe(
            registry,
            world,
            item,
            Some(actor),
            &placement,
            Site::slot(InventoryRef::Entity(mount), 0),
            now,
        );
        if !verdict.is_legitimate() {
            return Disposition::Cancel;
        }
        if let Some(id) = item.relic_id() {
            self.audit.record(
                AuditEvent::new(id, AuditKind::ContainerPlace, now)
                    .detail("Placed on display mount")
                    .actor(Some(actor))
                    .position(Some(&placement.position)),
            );
        }
        Disposition::Proceed
    }

    fn on_mount_break(
        &self,
        registry: &mut Registry,
        item: &ItemStack,
        position: BlockPos,
        now: i64,
    ) -> Disposition {
        let Some(id) = item.relic_id() else {
            return Disposition::Proceed;
        };
        if self.detector.evaluate(registry, item, None, &position).is_legitimate() {
            registry.update_location(id, &Placement::new(LocationKind::GroundEntity, position), now);
        }
        Disposition::Proceed
    }

    fn on_container_broken(
        &self,
        registry: &mut Registry,
        actor: Option<&HolderRef>,
        position: BlockPos,
        now: i64,
    ) -> Disposition {
        let placement = Placement::new(LocationKind::GroundEntity, position.clone());
        for id in registry.records_at(&position) {
            let in_block = registry.get(&id).map_or(false, |r| {
                matches!(
                    r.location.kind,
                    LocationKind::Container
                        | LocationKind::Hopper
                        | LocationKind::Dropper
                        | LocationKind::Dispenser
                )
            });
            if !in_block {
                continue;
            }
            registry.update_location(&id, &placement, now);
            self.audit.record(
                AuditEvent::new(&id, AuditKind::ContainerBroken, now)
                    .detail("Container broken; contents dropped")
                    .actor(actor)
                    .position(Some(&position)),
            );
        }
        Disposition::Proceed
    }
}
