//! Read access to the host world.
//!
//! The engine never owns world state. Everything it needs to know about
//! viewers, blocks and real entities comes through [`WorldView`].

mod grid;

pub use grid::GridWorld;

use std::fmt;

use crate::math::{Location, Vec3};
use crate::npc::skin::Skin;

/// Eye height of a standing viewer
pub const EYE_HEIGHT: f64 = 1.62;

/// Session id of a connected viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of a connected viewer
#[derive(Debug, Clone)]
pub struct ViewerState {
    pub id: ViewerId,
    pub name: String,
    pub location: Location,
    /// The viewer's own profile skin, when the host has it
    pub skin: Option<Skin>,
}

impl ViewerState {
    pub fn eye(&self) -> Vec3 {
        self.location.position() + Vec3::new(0.0, EYE_HEIGHT, 0.0)
    }

    pub fn look_direction(&self) -> Vec3 {
        self.location.direction()
    }
}

/// Id of a real (non-fake) host entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostEntityId(pub u64);

/// Snapshot of a real host entity
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    pub id: HostEntityId,
    pub location: Location,
    pub eye_height: f64,
}

/// Block kinds the movement engine distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Block {
    #[default]
    Air,
    Solid,
    /// Bottom half slab when `upper` is false
    Slab { upper: bool },
    Stairs,
    Ladder,
    Water,
    Lava,
    Cobweb,
    SoulSand,
}

impl Block {
    /// Blocks an entity cannot walk through
    pub fn is_solid(&self) -> bool {
        matches!(self, Block::Solid | Block::Slab { .. } | Block::Stairs | Block::SoulSand)
    }

    pub fn is_liquid(&self) -> bool {
        matches!(self, Block::Water | Block::Lava)
    }

    /// Blocks that can be climbed by walking into them
    pub fn is_climbable(&self) -> bool {
        matches!(self, Block::Ladder)
    }

    /// Half-height blocks that are stepped onto by half a block
    pub fn is_half_step(&self) -> bool {
        matches!(self, Block::Slab { upper: false } | Block::Stairs)
    }

    /// Height of the top surface above the block origin
    pub fn top(&self) -> f64 {
        match self {
            Block::Slab { upper: false } | Block::Stairs => 0.5,
            b if b.is_solid() => 1.0,
            _ => 0.0,
        }
    }
}

/// Host world read access, implemented once per host build
pub trait WorldView {
    /// An online viewer
    fn viewer(&self, id: ViewerId) -> Option<ViewerState>;

    /// All online viewers
    fn viewers(&self) -> Vec<ViewerState>;

    /// An online viewer by profile name (case-insensitive)
    fn viewer_by_name(&self, name: &str) -> Option<ViewerState> {
        self.viewers()
            .into_iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
    }

    /// Block at integer coordinates
    fn block_at(&self, world: &str, x: i32, y: i32, z: i32) -> Block;

    /// A real entity by id
    fn entity(&self, id: HostEntityId) -> Option<EntitySnapshot>;

    /// Real entities within `radius` of `center`
    fn entities_near(&self, center: &Location, radius: f64) -> Vec<EntitySnapshot>;

    fn is_online(&self, id: ViewerId) -> bool {
        self.viewer(id).is_some()
    }
}
