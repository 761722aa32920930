//! In-memory [`WorldAccess`] implementation.
//!
//! A small, fully deterministic world: holders with primary/personal stores and
//! a cursor, container blocks (optionally paired into double containers),
//! entities and a set of loaded regions. Used by the test suites and the
//! simulator to drive the core exactly the way a live server bridge would.

use crate::world::{
    BlockPos, ContainerKind, ContainerSnapshot, EntityId, EntityKind, EntitySnapshot,
    HolderSnapshot, InventoryHandle, InventoryRef, ItemStack, RegionKey, Slots, WorldAccess,
};
use relicward_env::{HolderId, HolderRef};
use std::collections::{BTreeMap, BTreeSet};

pub const PRIMARY_SLOTS: usize = 36;
pub const PERSONAL_SLOTS: usize = 27;

fn slots_for(kind: &ContainerKind) -> usize {
    match kind {
        ContainerKind::Hopper | ContainerKind::VehicleHopper => 5,
        ContainerKind::Dropper | ContainerKind::Dispenser => 9,
        _ => 27,
    }
}

#[derive(Debug, Clone)]
struct HolderState {
    holder: HolderRef,
    position: BlockPos,
    connected: bool,
    primary: Slots,
    personal: Slots,
    /// Always exactly one slot.
    cursor: Slots,
}

#[derive(Debug, Clone)]
struct BlockContainer {
    kind: ContainerKind,
    /// Empty on the non-canonical half of a double container.
    contents: Slots,
    canonical: Option<BlockPos>,
}

#[derive(Debug, Clone)]
struct EntityState {
    kind: EntityKind,
    position: BlockPos,
    contents: Slots,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWorld {
    holders: BTreeMap<HolderId, HolderState>,
    blocks: BTreeMap<BlockPos, BlockContainer>,
    entities: BTreeMap<EntityId, EntityState>,
    loaded: BTreeSet<RegionKey>,
    next_entity: u64,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    // === Holders ===

    /// Connects a holder, creating empty stores on first sight.
    pub fn connect(&mut self, holder: HolderRef, position: BlockPos) {
        self.loaded.insert(position.region());
        let state = self.holders.entry(holder.id).or_insert_with(|| HolderState {
            holder: holder.clone(),
            position: position.clone(),
            connected: true,
            primary: vec![None; PRIMARY_SLOTS],
            personal: vec![None; PERSONAL_SLOTS],
            cursor: vec![None],
        });
        state.connected = true;
        state.position = position;
        state.holder = holder;
    }

    pub fn disconnect(&mut self, id: HolderId) -> bool {
        match self.holders.get_mut(&id) {
            Some(state) => {
                state.connected = false;
                true
            }
            None => false,
        }
    }

    pub fn move_holder(&mut self, id: HolderId, position: BlockPos) {
        self.loaded.insert(position.region());
        if let Some(state) = self.holders.get_mut(&id) {
            state.position = position;
        }
    }

    /// Puts `item` in the holder's first free primary slot.
    pub fn give(&mut self, id: HolderId, item: ItemStack) -> Option<usize> {
        self.insert(&InventoryRef::Primary(id), item)
    }

    pub fn give_personal(&mut self, id: HolderId, item: ItemStack) -> Option<usize> {
        self.insert(&InventoryRef::Personal(id), item)
    }

    pub fn set_cursor(&mut self, id: HolderId, item: Option<ItemStack>) {
        if let Some(state) = self.holders.get_mut(&id) {
            state.cursor[0] = item;
        }
    }

    // === Blocks ===

    pub fn place_container(&mut self, position: BlockPos, kind: ContainerKind) {
        self.loaded.insert(position.region());
        let contents = vec![None; slots_for(&kind)];
        self.blocks.insert(
            position,
            BlockContainer {
                kind,
                contents,
                canonical: None,
            },
        );
    }

    /// Two adjacent halves sharing one inventory. Returns the canonical half.
    pub fn place_double_container(&mut self, a: BlockPos, b: BlockPos, kind: ContainerKind) -> BlockPos {
        let canonical = a.clone().min(b.clone());
        for half in [a, b] {
            self.loaded.insert(half.region());
            let contents = if half == canonical {
                vec![None; slots_for(&kind) * 2]
            } else {
                Vec::new()
            };
            self.blocks.insert(
                half,
                BlockContainer {
                    kind: kind.clone(),
                    contents,
                    canonical: Some(canonical.clone()),
                },
            );
        }
        canonical
    }

    /// Puts `item` in the first free slot of the container at `position`.
    pub fn put(&mut self, position: &BlockPos, item: ItemStack) -> Option<usize> {
        self.insert(&InventoryRef::Block(position.clone()), item)
    }

    /// Removes the container at `position`, dropping its contents as entities.
    /// The other half of a double container stays as a single container.
    pub fn break_block(&mut self, position: &BlockPos) -> Vec<EntityId> {
        let Some(key) = self.resolve(position) else {
            return Vec::new();
        };
        let contents = self
            .blocks
            .get_mut(&key)
            .map(|b| std::mem::take(&mut b.contents))
            .unwrap_or_default();
        let Some(broken) = self.blocks.remove(position) else {
            return Vec::new();
        };

        let partner = self
            .blocks
            .iter()
            .find(|(_, b)| broken.canonical.is_some() && b.canonical == broken.canonical)
            .map(|(pos, _)| pos.clone());
        if let Some(partner) = partner {
            if let Some(block) = self.blocks.get_mut(&partner) {
                block.canonical = None;
                block.contents = vec![None; slots_for(&block.kind)];
            }
        }

        contents
            .into_iter()
            .flatten()
            .map(|item| self.spawn_dropped(item, position.clone()))
            .collect()
    }

    fn resolve(&self, position: &BlockPos) -> Option<BlockPos> {
        let block = self.blocks.get(position)?;
        Some(block.canonical.clone().unwrap_or_else(|| position.clone()))
    }

    // === Entities ===

    fn spawn(&mut self, kind: EntityKind, position: BlockPos, contents: Slots) -> EntityId {
        self.next_entity += 1;
        let id = EntityId(self.next_entity);
        self.loaded.insert(position.region());
        self.entities.insert(
            id,
            EntityState {
                kind,
                position,
                contents,
            },
        );
        id
    }

    pub fn spawn_dropped(&mut self, item: ItemStack, position: BlockPos) -> EntityId {
        self.spawn(EntityKind::DroppedItem, position, vec![Some(item)])
    }

    pub fn spawn_mount(&mut self, position: BlockPos, item: Option<ItemStack>) -> EntityId {
        self.spawn(EntityKind::DisplayMount, position, vec![item])
    }

    pub fn spawn_vehicle(&mut self, kind: ContainerKind, position: BlockPos) -> EntityId {
        let contents = vec![None; slots_for(&kind)];
        self.spawn(EntityKind::Vehicle(kind), position, contents)
    }

    pub fn move_entity(&mut self, id: EntityId, position: BlockPos) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.position = position;
        }
    }

    /// Dropped-item entities currently at `position`.
    pub fn dropped_at(&self, position: &BlockPos) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, e)| e.kind == EntityKind::DroppedItem && e.position == *position)
            .map(|(id, _)| *id)
            .collect()
    }

    // === Regions ===

    pub fn load_region(&mut self, region: RegionKey) {
        self.loaded.insert(region);
    }

    pub fn unload_region(&mut self, region: &RegionKey) {
        self.loaded.remove(region);
    }

    // === Inspection ===

    /// Handle for an inventory, as a server bridge would report it.
    pub fn handle_for(&self, reference: &InventoryRef) -> Option<InventoryHandle> {
        match reference {
            InventoryRef::Primary(id) | InventoryRef::Cursor(id) | InventoryRef::Personal(id) => {
                let state = self.holders.get(id)?;
                let kind = match reference {
                    InventoryRef::Personal(_) => ContainerKind::PersonalStore,
                    _ => ContainerKind::PlayerInventory,
                };
                Some(InventoryHandle {
                    reference: reference.clone(),
                    kind,
                    position: state.position.clone(),
                    holder: Some(state.holder.clone()),
                    canonical: None,
                })
            }
            InventoryRef::Block(position) => {
                let block = self.blocks.get(position)?;
                Some(InventoryHandle {
                    reference: reference.clone(),
                    kind: block.kind.clone(),
                    position: position.clone(),
                    holder: None,
                    canonical: block.canonical.clone(),
                })
            }
            InventoryRef::Entity(id) => {
                let entity = self.entities.get(id)?;
                let kind = match &entity.kind {
                    EntityKind::Vehicle(kind) => kind.clone(),
                    _ => ContainerKind::Other("ENTITY".to_string()),
                };
                Some(InventoryHandle {
                    reference: reference.clone(),
                    kind,
                    position: entity.position.clone(),
                    holder: None,
                    canonical: None,
                })
            }
            InventoryRef::Nested { parent, .. } => self.handle_for(parent),
        }
    }

    /// Physical copies of relic `id` anywhere in the world, nested ones included.
    pub fn count_relic(&self, id: &str) -> usize {
        fn count(slots: &Slots, id: &str) -> usize {
            slots
                .iter()
                .flatten()
                .map(|item| {
                    if item.relic_id() == Some(id) {
                        1
                    } else {
                        count(&item.contents, id)
                    }
                })
                .sum()
        }
        let held: usize = self
            .holders
            .values()
            .map(|h| count(&h.primary, id) + count(&h.personal, id) + count(&h.cursor, id))
            .sum();
        let placed: usize = self.blocks.values().map(|b| count(&b.contents, id)).sum();
        let loose: usize = self.entities.values().map(|e| count(&e.contents, id)).sum();
        held + placed + loose
    }

    fn slots(&self, inventory: &InventoryRef) -> Option<&Slots> {
        match inventory {
            InventoryRef::Primary(id) => self.holders.get(id).map(|h| &h.primary),
            InventoryRef::Personal(id) => self.holders.get(id).map(|h| &h.personal),
            InventoryRef::Cursor(id) => self.holders.get(id).map(|h| &h.cursor),
            InventoryRef::Block(position) => {
                let key = self.resolve(position)?;
                self.blocks.get(&key).map(|b| &b.contents)
            }
            InventoryRef::Entity(id) => self.entities.get(id).map(|e| &e.contents),
            InventoryRef::Nested { parent, slot } => self
                .slots(parent)?
                .get(*slot)?
                .as_ref()
                .filter(|item| item.is_nested_container())
                .map(|item| &item.contents),
        }
    }

    fn slots_mut(&mut self, inventory: &InventoryRef) -> Option<&mut Slots> {
        match inventory {
            InventoryRef::Primary(id) => self.holders.get_mut(id).map(|h| &mut h.primary),
            InventoryRef::Personal(id) => self.holders.get_mut(id).map(|h| &mut h.personal),
            InventoryRef::Cursor(id) => self.holders.get_mut(id).map(|h| &mut h.cursor),
            InventoryRef::Block(position) => {
                let key = self.resolve(position)?;
                self.blocks.get_mut(&key).map(|b| &mut b.contents)
            }
            InventoryRef::Entity(id) => self.entities.get_mut(id).map(|e| &mut e.contents),
            InventoryRef::Nested { parent, slot } => self
                .slots_mut(parent)?
                .get_mut(*slot)?
                .as_mut()
                .filter(|item| item.is_nested_container())
                .map(|item| &mut item.contents),
        }
    }

    /// Puts `item` in the first free slot of any inventory.
    pub fn insert(&mut self, inventory: &InventoryRef, item: ItemStack) -> Option<usize> {
        let slots = self.slots_mut(inventory)?;
        let index = slots.iter().position(Option::is_none)?;
        slots[index] = Some(item);
        Some(index)
    }

    fn holder_snapshot(state: &HolderState) -> HolderSnapshot {
        HolderSnapshot {
            holder: state.holder.clone(),
            position: state.position.clone(),
            connected: state.connected,
            primary: state.primary.clone(),
            personal: state.personal.clone(),
            cursor: state.cursor.first().cloned().flatten(),
        }
    }

    fn entity_snapshot(id: EntityId, state: &EntityState) -> EntitySnapshot {
        EntitySnapshot {
            id,
            kind: state.kind.clone(),
            position: state.position.clone(),
            contents: state.contents.clone(),
        }
    }
}

impl WorldAccess for MemoryWorld {
    fn connected_holders(&self) -> Vec<HolderSnapshot> {
        self.holders
            .values()
            .filter(|h| h.connected)
            .map(Self::holder_snapshot)
            .collect()
    }

    fn holder(&self, id: HolderId) -> Option<HolderSnapshot> {
        self.holders.get(&id).map(Self::holder_snapshot)
    }

    fn loaded_regions(&self) -> Vec<RegionKey> {
        self.loaded.iter().cloned().collect()
    }

    fn is_region_loaded(&self, region: &RegionKey) -> bool {
        self.loaded.contains(region)
    }

    fn containers_in(&self, region: &RegionKey) -> Vec<ContainerSnapshot> {
        if !self.loaded.contains(region) {
            return Vec::new();
        }
        self.blocks
            .iter()
            .filter(|(position, _)| position.region() == *region)
            .filter_map(|(position, block)| {
                let reference = InventoryRef::Block(position.clone());
                let contents = self.slots(&reference)?.clone();
                Some(ContainerSnapshot {
                    handle: InventoryHandle {
                        reference,
                        kind: block.kind.clone(),
                        position: position.clone(),
                        holder: None,
                        canonical: block.canonical.clone(),
                    },
                    contents,
                })
            })
            .collect()
    }

    fn free_entities(&self) -> Vec<EntitySnapshot> {
        self.entities
            .iter()
            .filter(|(_, e)| self.loaded.contains(&e.position.region()))
            .map(|(id, e)| Self::entity_snapshot(*id, e))
            .collect()
    }

    fn entity(&self, id: EntityId) -> Option<EntitySnapshot> {
        self.entities.get(&id).map(|e| Self::entity_snapshot(id, e))
    }

    fn contents(&self, inventory: &InventoryRef) -> Option<Slots> {
        self.slots(inventory).cloned()
    }

    fn remove_entity(&mut self, id: EntityId) -> bool {
        self.entities.remove(&id).is_some()
    }

    fn take_slot(&mut self, inventory: &InventoryRef, slot: usize) -> Option<ItemStack> {
        let taken = self.slots_mut(inventory)?.get_mut(slot)?.take();
        // A dropped item entity does not outlive its stack.
        if let InventoryRef::Entity(id) = inventory {
            let emptied = self
                .entities
                .get(id)
                .map(|e| e.kind == EntityKind::DroppedItem && e.contents.iter().all(Option::is_none))
                .unwrap_or(false);
            if emptied {
                self.entities.remove(id);
            }
        }
        taken
    }

    fn replace_slot(&mut self, inventory: &InventoryRef, slot: usize, item: ItemStack) -> bool {
        let Some(current) = self.slots_mut(inventory).and_then(|slots| slots.get_mut(slot)) else {
            return false;
        };
        if current.is_none() {
            return false;
        }
        *current = Some(item);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{collect_relics, Material, Site};

    fn pos(x: i32, z: i32) -> BlockPos {
        BlockPos::new("overworld", x, 64, z)
    }

    fn relic(id: &str) -> ItemStack {
        let mut item = ItemStack::blank_relic();
        item.tags.id = Some(id.to_string());
        item
    }

    #[test]
    fn test_double_container_shares_inventory() {
        let mut world = MemoryWorld::new();
        let canonical = world.place_double_container(pos(1, 0), pos(0, 0), ContainerKind::Chest);
        assert_eq!(canonical, pos(0, 0));

        let slot = world.put(&pos(1, 0), relic("MC-0001")).unwrap();
        let via_other_half = world.contents(&InventoryRef::Block(pos(0, 0))).unwrap();
        assert_eq!(via_other_half[slot].as_ref().and_then(|i| i.relic_id()), Some("MC-0001"));

        let containers = world.containers_in(&pos(0, 0).region());
        assert_eq!(containers.len(), 2);
        assert!(containers.iter().all(|c| c.handle.canonical == Some(pos(0, 0))));
    }

    #[test]
    fn test_nested_slot_access() {
        let mut world = MemoryWorld::new();
        let alice = HolderRef::new(HolderId::from_seed(1), "alice");
        world.connect(alice.clone(), pos(0, 0));
        let outer = world
            .give(alice.id, ItemStack::nested_box(vec![None, Some(relic("MC-0002"))]))
            .unwrap();

        let primary = InventoryRef::Primary(alice.id);
        let found = collect_relics(&world.contents(&primary).unwrap(), &primary);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].nested_in, Some(Material::NestedBox));
        assert_eq!(found[0].site, Site::slot(primary.nested(outer), 1));

        assert!(found[0].site.remove(&mut world, |i| i.relic_id() == Some("MC-0002")));
        assert_eq!(world.contents(&primary.nested(outer)).unwrap(), vec![None, None]);
        assert_eq!(world.count_relic("MC-0002"), 0);
    }

    #[test]
    fn test_taking_dropped_stack_removes_entity() {
        let mut world = MemoryWorld::new();
        let id = world.spawn_dropped(relic("MC-0003"), pos(5, 5));
        assert!(world.take_slot(&InventoryRef::Entity(id), 0).is_some());
        assert!(world.entity(id).is_none());
    }

    #[test]
    fn test_unloaded_regions_hide_contents() {
        let mut world = MemoryWorld::new();
        world.place_container(pos(100, 100), ContainerKind::Barrel);
        world.spawn_dropped(relic("MC-0004"), pos(100, 100));
        world.unload_region(&pos(100, 100).region());

        assert!(world.containers_in(&pos(100, 100).region()).is_empty());
        assert!(world.free_entities().is_empty());
        assert_eq!(world.count_relic("MC-0004"), 1);
    }

    #[test]
    fn test_break_block_drops_contents() {
        let mut world = MemoryWorld::new();
        world.place_container(pos(2, 2), ContainerKind::Chest);
        world.put(&pos(2, 2), relic("MC-0005"));

        let dropped = world.break_block(&pos(2, 2));
        assert_eq!(dropped.len(), 1);
        assert!(world.contents(&InventoryRef::Block(pos(2, 2))).is_none());
        assert_eq!(world.dropped_at(&pos(2, 2)), dropped);
    }

    #[test]
    fn test_replace_slot_requires_occupied() {
        let mut world = MemoryWorld::new();
        world.place_container(pos(3, 3), ContainerKind::Hopper);
        let inv = InventoryRef::Block(pos(3, 3));
        assert!(!world.replace_slot(&inv, 0, relic("MC-0006")));
        world.put(&pos(3, 3), relic("MC-0006"));
        assert!(world.replace_slot(&inv, 0, relic("MC-0007")));
        assert_eq!(world.count_relic("MC-0007"), 1);
        assert_eq!(world.count_relic("MC-0006"), 0);
    }
}
