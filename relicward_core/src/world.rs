//! World model and the access port the core reads and mutates the world through.
//!
//! The game world is an external, continuously mutating store. The core never
//! owns it: every sweep works on owned snapshots returned by [`WorldAccess`],
//! and every physical removal goes back through the same port.

use relicward_env::{HolderId, HolderRef};
use serde::{Deserialize, Serialize};

/// Integer block position inside a named world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// The 16x16 column this position belongs to.
    pub fn region(&self) -> RegionKey {
        RegionKey {
            world: self.world.clone(),
            rx: self.x >> 4,
            rz: self.z >> 4,
        }
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({},{},{})", self.world, self.x, self.y, self.z)
    }
}

/// Key of a loadable world region (a 16x16 block column).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionKey {
    pub world: String,
    pub rx: i32,
    pub rz: i32,
}

/// Handle of a live world entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

// ============================================================================
// ITEMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Material {
    /// The tracked asset material.
    Relic,
    /// Slotted portable container (a shulker-style box).
    NestedBox,
    /// Unslotted portable container (a bundle-style pouch).
    Pouch,
    Other(String),
}

/// Raw stamp fields embedded in an item's persistent data.
///
/// Stored as loose optional values because anything outside the core can
/// write them; only `RelicIdentity::verify` decides whether they are valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelicTags {
    pub id: Option<String>,
    pub class: Option<String>,
    pub created_at: Option<i64>,
    pub signature: Option<String>,
}

/// A physical item stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStack {
    pub material: Material,
    pub tags: RelicTags,
    /// Slots of a nested container item; empty for everything else.
    pub contents: Slots,
}

pub type Slots = Vec<Option<ItemStack>>;

impl ItemStack {
    /// A relic item that carries no stamp yet.
    pub fn blank_relic() -> Self {
        Self {
            material: Material::Relic,
            tags: RelicTags::default(),
            contents: Vec::new(),
        }
    }

    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            material: Material::Other(name.into()),
            tags: RelicTags::default(),
            contents: Vec::new(),
        }
    }

    pub fn nested_box(contents: Slots) -> Self {
        Self {
            material: Material::NestedBox,
            tags: RelicTags::default(),
            contents,
        }
    }

    pub fn pouch(contents: Slots) -> Self {
        Self {
            material: Material::Pouch,
            tags: RelicTags::default(),
            contents,
        }
    }

    pub fn is_relic(&self) -> bool {
        self.material == Material::Relic
    }

    pub fn is_nested_container(&self) -> bool {
        matches!(self.material, Material::NestedBox | Material::Pouch)
    }

    /// The embedded relic id, if any. Does not verify the stamp.
    pub fn relic_id(&self) -> Option<&str> {
        if !self.is_relic() {
            return None;
        }
        self.tags.id.as_deref()
    }
}

// ============================================================================
// INVENTORIES
// ============================================================================

/// Address of an inventory the world can resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InventoryRef {
    /// A holder's main inventory.
    Primary(HolderId),
    /// A holder's personal (ender-style) store.
    Personal(HolderId),
    /// The item a holder has on the cursor.
    Cursor(HolderId),
    Block(BlockPos),
    Entity(EntityId),
    /// Contents of a nested container item sitting in `slot` of `parent`.
    Nested { parent: Box<InventoryRef>, slot: usize },
}

impl InventoryRef {
    pub fn nested(&self, slot: usize) -> InventoryRef {
        InventoryRef::Nested {
            parent: Box::new(self.clone()),
            slot,
        }
    }
}

/// Short-lived interaction surfaces. Their output slot is a virtual preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workstation {
    Crafting,
    Anvil,
    Grindstone,
    Smithing,
    Enchanting,
    Stonecutter,
    Cartography,
    Loom,
    Furnace,
    BlastFurnace,
    Smoker,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    PlayerInventory,
    PersonalStore,
    Chest,
    Barrel,
    Hopper,
    Dropper,
    Dispenser,
    VehicleChest,
    VehicleHopper,
    Workstation(Workstation),
    Other(String),
}

impl ContainerKind {
    /// Label recorded in a relic's location.
    pub fn label(&self) -> String {
        match self {
            ContainerKind::PlayerInventory => "PLAYER".to_string(),
            ContainerKind::PersonalStore => "PERSONAL_STORE".to_string(),
            ContainerKind::Chest => "CHEST".to_string(),
            ContainerKind::Barrel => "BARREL".to_string(),
            ContainerKind::Hopper => "HOPPER".to_string(),
            ContainerKind::Dropper => "DROPPER".to_string(),
            ContainerKind::Dispenser => "DISPENSER".to_string(),
            ContainerKind::VehicleChest => "VEHICLE_CHEST".to_string(),
            ContainerKind::VehicleHopper => "VEHICLE_HOPPER".to_string(),
            ContainerKind::Workstation(w) => format!("{:?}", w).to_uppercase(),
            ContainerKind::Other(name) => name.to_uppercase(),
        }
    }

    pub fn is_workstation(&self) -> bool {
        matches!(self, ContainerKind::Workstation(_))
    }
}

/// Generic inventory capability: what it is, where it is, who owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryHandle {
    pub reference: InventoryRef,
    pub kind: ContainerKind,
    pub position: BlockPos,
    /// Owning holder for player-bound inventories.
    pub holder: Option<HolderRef>,
    /// Canonical half of a double container. Both halves report the same one.
    pub canonical: Option<BlockPos>,
}

impl InventoryHandle {
    /// The position under which this inventory's contents are recorded.
    pub fn location_key(&self) -> &BlockPos {
        self.canonical.as_ref().unwrap_or(&self.position)
    }
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    DroppedItem,
    DisplayMount,
    Vehicle(ContainerKind),
    Other(String),
}

/// Owned copy of an entity. A dropped item or mount keeps its stack in slot 0.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: BlockPos,
    pub contents: Slots,
}

#[derive(Debug, Clone)]
pub struct HolderSnapshot {
    pub holder: HolderRef,
    pub position: BlockPos,
    pub connected: bool,
    pub primary: Slots,
    pub personal: Slots,
    pub cursor: Option<ItemStack>,
}

impl HolderSnapshot {
    /// Primary store, personal store and cursor as inventory handles with their slots.
    pub fn inventories(&self) -> Vec<(InventoryHandle, Slots)> {
        let id = self.holder.id;
        let handle = |reference: InventoryRef, kind: ContainerKind| InventoryHandle {
            reference,
            kind,
            position: self.position.clone(),
            holder: Some(self.holder.clone()),
            canonical: None,
        };
        vec![
            (
                handle(InventoryRef::Primary(id), ContainerKind::PlayerInventory),
                self.primary.clone(),
            ),
            (
                handle(InventoryRef::Personal(id), ContainerKind::PersonalStore),
                self.personal.clone(),
            ),
            (
                handle(InventoryRef::Cursor(id), ContainerKind::PlayerInventory),
                vec![self.cursor.clone()],
            ),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ContainerSnapshot {
    pub handle: InventoryHandle,
    pub contents: Slots,
}

/// Port through which the core observes and mutates the world.
///
/// Implemented by the host server bridge and by `MemoryWorld`.
pub trait WorldAccess {
    /// Snapshots of every connected holder.
    fn connected_holders(&self) -> Vec<HolderSnapshot>;

    /// Snapshot of any known holder, connected or not.
    fn holder(&self, id: HolderId) -> Option<HolderSnapshot>;

    fn is_connected(&self, id: HolderId) -> bool {
        self.holder(id).map(|h| h.connected).unwrap_or(false)
    }

    fn loaded_regions(&self) -> Vec<RegionKey>;

    fn is_region_loaded(&self, region: &RegionKey) -> bool;

    /// Container-bearing blocks in a loaded region. Both halves of a double
    /// container are reported, each with the same `canonical` position.
    fn containers_in(&self, region: &RegionKey) -> Vec<ContainerSnapshot>;

    /// Entities in loaded regions.
    fn free_entities(&self) -> Vec<EntitySnapshot>;

    fn entity(&self, id: EntityId) -> Option<EntitySnapshot>;

    fn contents(&self, inventory: &InventoryRef) -> Option<Slots>;

    fn remove_entity(&mut self, id: EntityId) -> bool;

    fn take_slot(&mut self, inventory: &InventoryRef, slot: usize) -> Option<ItemStack>;

    /// Overwrites an occupied slot. Returns false if the slot is empty or unknown.
    fn replace_slot(&mut self, inventory: &InventoryRef, slot: usize, item: ItemStack) -> bool;
}

// ============================================================================
// REMOVAL SITES
// ============================================================================

/// Where an encountered item physically sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Site {
    /// A dropped-item entity.
    Entity(EntityId),
    /// A known slot of an inventory.
    Slot { inventory: InventoryRef, slot: usize },
    /// Somewhere in an inventory; found by re-scanning.
    Inventory(InventoryRef),
    /// No physical handle available.
    Detached,
}

impl Site {
    pub fn slot(inventory: InventoryRef, slot: usize) -> Self {
        Site::Slot { inventory, slot }
    }

    /// Inventory slot addressed by this site, if any. A dropped item is slot 0
    /// of its entity.
    pub fn as_slot(&self) -> Option<(InventoryRef, usize)> {
        match self {
            Site::Entity(id) => Some((InventoryRef::Entity(*id), 0)),
            Site::Slot { inventory, slot } => Some((inventory.clone(), *slot)),
            Site::Inventory(_) | Site::Detached => None,
        }
    }

    /// The item currently at this exact site.
    pub fn peek(&self, world: &dyn WorldAccess) -> Option<ItemStack> {
        let (inventory, slot) = self.as_slot()?;
        world.contents(&inventory)?.get(slot).cloned().flatten()
    }

    /// Removes the item at this exact site if `matches` accepts it.
    pub fn remove_in_place(
        &self,
        world: &mut dyn WorldAccess,
        matches: impl Fn(&ItemStack) -> bool,
    ) -> bool {
        let accepted = self.peek(world).map(|item| matches(&item)).unwrap_or(false);
        if !accepted {
            return false;
        }
        match self {
            Site::Entity(id) => world.remove_entity(*id),
            Site::Slot { inventory, slot } => world.take_slot(inventory, *slot).is_some(),
            Site::Inventory(_) | Site::Detached => false,
        }
    }

    /// Removes the first item at this site accepted by `matches`.
    ///
    /// Slot sites fall back to re-scanning their inventory when the slot no
    /// longer holds a matching item.
    pub fn remove(&self, world: &mut dyn WorldAccess, matches: impl Fn(&ItemStack) -> bool) -> bool {
        if self.remove_in_place(world, &matches) {
            return true;
        }
        match self {
            Site::Slot { inventory, .. } | Site::Inventory(inventory) => {
                remove_first_matching(world, inventory, &matches)
            }
            Site::Entity(_) | Site::Detached => false,
        }
    }
}

/// A relic met while walking an inventory.
#[derive(Debug, Clone)]
pub struct FoundRelic {
    pub item: ItemStack,
    pub site: Site,
    /// Material of the nested container item holding it, if any.
    pub nested_in: Option<Material>,
}

/// Every relic in `slots`, descending into nested container items.
pub fn collect_relics(slots: &Slots, inventory: &InventoryRef) -> Vec<FoundRelic> {
    let mut found = Vec::new();
    walk_relics(slots, inventory, None, &mut found);
    found
}

fn walk_relics(
    slots: &Slots,
    inventory: &InventoryRef,
    nested_in: Option<&Material>,
    found: &mut Vec<FoundRelic>,
) {
    for (index, slot) in slots.iter().enumerate() {
        let Some(item) = slot else { continue };
        if item.is_relic() {
            found.push(FoundRelic {
                item: item.clone(),
                site: Site::slot(inventory.clone(), index),
                nested_in: nested_in.cloned(),
            });
        } else if item.is_nested_container() {
            walk_relics(&item.contents, &inventory.nested(index), Some(&item.material), found);
        }
    }
}

fn remove_first_matching(
    world: &mut dyn WorldAccess,
    inventory: &InventoryRef,
    matches: &dyn Fn(&ItemStack) -> bool,
) -> bool {
    let Some(slots) = world.contents(inventory) else {
        return false;
    };
    let found = slots
        .iter()
        .position(|slot| slot.as_ref().map(|item| matches(item)).unwrap_or(false));
    match found {
        Some(index) => world.take_slot(inventory, index).is_some(),
        None => false,
    }
}
