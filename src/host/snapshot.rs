//! Read-only host state snapshots published to scripts.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A position in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new position.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position.
    pub fn distance(&self, other: &Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Snapshot of the controlled player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Character name.
    pub name: String,
    /// Current health.
    pub health: f64,
    /// Maximum health.
    pub max_health: f64,
    /// Current energy/stamina.
    pub energy: f64,
    /// Character level.
    pub level: u32,
    /// Current position.
    pub position: Vec3,
    /// Whether the player is currently moving.
    pub moving: bool,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            name: String::new(),
            health: 0.0,
            max_health: 0.0,
            energy: 0.0,
            level: 1,
            position: Vec3::default(),
            moving: false,
        }
    }
}

/// Snapshot of an entity visible to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Host-assigned entity id.
    pub id: u64,
    /// Entity kind ("npc", "monster", "resource", ...).
    pub kind: String,
    /// Display name.
    pub name: String,
    /// Current position.
    pub position: Vec3,
    /// Whether the entity is hostile toward the player.
    pub hostile: bool,
}

/// Snapshot of the observable world.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Host tick counter at capture time.
    pub tick: u64,
    /// In-game time of day in hours, 0.0..24.0.
    pub time_of_day: f64,
    /// Entities currently visible.
    pub entities: Vec<EntitySnapshot>,
}

impl WorldSnapshot {
    /// Whether the in-game clock is in the daylight range.
    pub fn is_day(&self) -> bool {
        (6.0..18.0).contains(&self.time_of_day)
    }
}

/// A single inventory stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSnapshot {
    /// Item identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Stack count.
    pub count: u32,
}

/// Snapshot of the player inventory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Total slot capacity.
    pub capacity: u32,
    /// Occupied stacks.
    pub items: Vec<ItemSnapshot>,
}

impl InventorySnapshot {
    /// Number of unoccupied slots.
    pub fn free_slots(&self) -> u32 {
        self.capacity.saturating_sub(self.items.len() as u32)
    }

    /// Total count of an item across all stacks.
    pub fn count_of(&self, id: &str) -> u32 {
        self.items
            .iter()
            .filter(|i| i.id == id)
            .map(|i| i.count)
            .sum()
    }
}

#[derive(Debug, Default)]
struct HubState {
    player: PlayerSnapshot,
    world: WorldSnapshot,
    inventory: InventorySnapshot,
}

/// Shared publication point for host snapshots.
///
/// The host control loop replaces snapshots once per frame; script worker
/// threads read copies out concurrently.
#[derive(Debug, Default)]
pub struct SnapshotHub {
    state: RwLock<HubState>,
}

impl SnapshotHub {
    /// Create a hub with empty snapshots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the player snapshot.
    pub fn set_player(&self, player: PlayerSnapshot) {
        self.state.write().expect("snapshot hub poisoned").player = player;
    }

    /// Replace the world snapshot.
    pub fn set_world(&self, world: WorldSnapshot) {
        self.state.write().expect("snapshot hub poisoned").world = world;
    }

    /// Replace the inventory snapshot.
    pub fn set_inventory(&self, inventory: InventorySnapshot) {
        self.state.write().expect("snapshot hub poisoned").inventory = inventory;
    }

    /// Copy out the current player snapshot.
    pub fn player(&self) -> PlayerSnapshot {
        self.state.read().expect("snapshot hub poisoned").player.clone()
    }

    /// Copy out the current world snapshot.
    pub fn world(&self) -> WorldSnapshot {
        self.state.read().expect("snapshot hub poisoned").world.clone()
    }

    /// Copy out the current inventory snapshot.
    pub fn inventory(&self) -> InventorySnapshot {
        self.state
            .read()
            .expect("snapshot hub poisoned")
            .inventory
            .clone()
    }
}
