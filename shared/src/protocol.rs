//! Wire definitions shared between the NPC host and its viewers.

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::entities::{EquipmentSlot, GlowColor, ItemStack, Pose, SkinParts};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 3;

/// Host tick rate in Hz
pub const SERVER_TICK_RATE: u32 = 20;

/// Default host port
pub const DEFAULT_PORT: u16 = 25570;

/// Relative moves are sent as fixed point with this many steps per block
pub const RELATIVE_MOVE_SCALE: f64 = 4096.0;

/// Exclusive per-axis bound of a single relative move, in blocks.
/// `8.0 * 4096` no longer fits in an `i16`.
pub const RELATIVE_MOVE_LIMIT: f64 = 8.0;

/// Entity id on the wire
pub type EntityId = i32;

/// Game profile id (a random UUID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub u128);

impl ProfileId {
    /// Version 4 UUID layout from 128 random bits
    pub fn from_random_bits(bits: u128) -> Self {
        let bits = (bits & !(0xF << 76)) | (0x4 << 76);
        let bits = (bits & !(0x3 << 62)) | (0x2 << 62);
        Self(bits)
    }

    /// Short form used in generated names
    pub fn short(&self) -> String {
        format!("{:08x}", (self.0 >> 96) as u32)
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// Encode one axis of a relative move, `None` if it does not fit the wire format
pub fn encode_relative_delta(delta: f64) -> Option<i16> {
    if !delta.is_finite() || delta.abs() >= RELATIVE_MOVE_LIMIT {
        return None;
    }
    let scaled = (delta * RELATIVE_MOVE_SCALE).round();
    if scaled < i16::MIN as f64 || scaled > i16::MAX as f64 {
        return None;
    }
    Some(scaled as i16)
}

/// Decode one axis of a relative move back to blocks
pub fn decode_relative_delta(raw: i16) -> f64 {
    raw as f64 / RELATIVE_MOVE_SCALE
}

// =============================================================================
// Metadata
// =============================================================================

/// Bits of the shared entity flag byte
pub mod entity_flags {
    pub const ON_FIRE: u8 = 0x01;
    pub const CROUCHING: u8 = 0x02;
    pub const SWIMMING: u8 = 0x10;
    pub const INVISIBLE: u8 = 0x20;
    pub const GLOWING: u8 = 0x40;
}

/// Bits of the armor stand flag byte used by hologram markers
pub mod marker_flags {
    pub const SMALL: u8 = 0x01;
    pub const NO_BASEPLATE: u8 = 0x08;
    pub const MARKER: u8 = 0x10;
}

/// A single metadata entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataEntry {
    /// Shared entity flags (see [`entity_flags`])
    Flags(u8),
    Pose(Pose),
    /// Displayed skin layers of a player entity
    SkinParts(SkinParts),
    CustomName(Option<String>),
    CustomNameVisible(bool),
    /// Armor stand flags (see [`marker_flags`])
    MarkerFlags(u8),
}

// =============================================================================
// Teams
// =============================================================================

/// Name tag visibility rule of a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameTagVisibility {
    Always,
    Never,
}

/// Collision rule of a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionRule {
    Always,
    Never,
}

/// Team packet action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TeamAction {
    Create {
        color: GlowColor,
        name_tag_visibility: NameTagVisibility,
        collision: CollisionRule,
        members: Vec<String>,
    },
    Update {
        color: GlowColor,
        name_tag_visibility: NameTagVisibility,
        collision: CollisionRule,
    },
    Remove,
}

// =============================================================================
// Host -> Viewer Packets
// =============================================================================

/// Packets sent from the host to one viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerPacket {
    /// Add a profile to the viewer's player list
    PlayerInfoAdd {
        profile_id: ProfileId,
        name: String,
        texture: Option<String>,
        signature: Option<String>,
        listed: bool,
    },

    /// Remove profiles from the viewer's player list
    PlayerInfoRemove {
        profile_ids: Vec<ProfileId>,
    },

    /// Spawn a player entity for a profile already in the player list
    SpawnPlayer {
        entity_id: EntityId,
        profile_id: ProfileId,
        position: [f64; 3],
        yaw: f32,
        pitch: f32,
    },

    /// Spawn an invisible armor stand used as a hologram line
    SpawnMarker {
        entity_id: EntityId,
        profile_id: ProfileId,
        position: [f64; 3],
    },

    /// Destroy entities (batched)
    DestroyEntities {
        entity_ids: Vec<EntityId>,
    },

    /// Absolute position
    Teleport {
        entity_id: EntityId,
        position: [f64; 3],
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },

    /// Fixed-point relative move, see [`encode_relative_delta`]
    RelativeMove {
        entity_id: EntityId,
        delta: [i16; 3],
        on_ground: bool,
    },

    /// Body rotation
    Rotation {
        entity_id: EntityId,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },

    /// Head rotation
    HeadRotation {
        entity_id: EntityId,
        head_yaw: f32,
    },

    /// Equipment, one entry per slot
    Equipment {
        entity_id: EntityId,
        slots: Vec<(EquipmentSlot, ItemStack)>,
    },

    /// Entity metadata
    Metadata {
        entity_id: EntityId,
        entries: Vec<MetadataEntry>,
    },

    /// Scoreboard team used to hide name tags and control pushing
    Team {
        name: String,
        action: TeamAction,
    },

    /// Chat line
    Chat {
        text: String,
    },

    /// Text above the hotbar
    ActionBar {
        text: String,
    },

    /// Title and subtitle
    Title {
        title: String,
        subtitle: String,
        fade_in: u32,
        stay: u32,
        fade_out: u32,
    },

    /// Raw plugin channel message (proxy commands)
    PluginMessage {
        channel: String,
        data: Vec<u8>,
    },
}

impl ServerPacket {
    /// Entity targeted by this packet, if any
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Self::SpawnPlayer { entity_id, .. }
            | Self::SpawnMarker { entity_id, .. }
            | Self::Teleport { entity_id, .. }
            | Self::RelativeMove { entity_id, .. }
            | Self::Rotation { entity_id, .. }
            | Self::HeadRotation { entity_id, .. }
            | Self::Equipment { entity_id, .. }
            | Self::Metadata { entity_id, .. } => Some(*entity_id),
            _ => None,
        }
    }
}

// =============================================================================
// Viewer -> Host Messages
// =============================================================================

/// Which hand a viewer used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hand {
    Main,
    Off,
}

/// Raw entity interaction action
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InteractAction {
    Interact,
    Attack,
    InteractAt { target: [f32; 3] },
}

/// Messages sent from a viewer to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// First message of a session
    Hello {
        protocol_version: u32,
        name: String,
        world: String,
        position: [f64; 3],
        yaw: f32,
        pitch: f32,
        /// The viewer's own skin, when the client knows it
        texture: Option<String>,
        signature: Option<String>,
    },

    /// Position/look update (sent frequently)
    Move {
        position: [f64; 3],
        yaw: f32,
        pitch: f32,
    },

    /// The viewer moved to another world
    ChangeWorld {
        world: String,
        position: [f64; 3],
    },

    /// Use-entity packet
    Interact {
        entity_id: EntityId,
        action: InteractAction,
        hand: Hand,
        sneaking: bool,
    },

    /// Disconnect gracefully
    Disconnect,
}

// =============================================================================
// Serialization helpers
// =============================================================================

impl ClientMessage {
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ServerPacket {
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
