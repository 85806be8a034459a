//! Value types carried by NPC packets.

use serde::{Deserialize, Serialize};

/// Body pose of a fake player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Pose {
    #[default]
    Standing,
    Crouching,
    Swimming,
    Sleeping,
}

impl Pose {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Standing => "standing",
            Self::Crouching => "crouching",
            Self::Swimming => "swimming",
            Self::Sleeping => "sleeping",
        }
    }
}

// =============================================================================
// Skin parts
// =============================================================================

/// Visible second-layer skin parts, packed the way clients expect them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkinParts(pub u8);

impl SkinParts {
    pub const CAPE: u8 = 0x01;
    pub const JACKET: u8 = 0x02;
    pub const LEFT_SLEEVE: u8 = 0x04;
    pub const RIGHT_SLEEVE: u8 = 0x08;
    pub const LEFT_PANTS: u8 = 0x10;
    pub const RIGHT_PANTS: u8 = 0x20;
    pub const HAT: u8 = 0x40;

    /// Every part visible
    pub const ALL: SkinParts = SkinParts(0x7F);

    /// Nothing but the base layer
    pub const NONE: SkinParts = SkinParts(0);

    pub fn contains(&self, part: u8) -> bool {
        self.0 & part == part
    }

    pub fn set(&mut self, part: u8, visible: bool) {
        if visible {
            self.0 |= part;
        } else {
            self.0 &= !part;
        }
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl Default for SkinParts {
    fn default() -> Self {
        Self::ALL
    }
}

// =============================================================================
// Equipment
// =============================================================================

/// The six equipment slots of a humanoid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EquipmentSlot {
    MainHand = 0,
    OffHand = 1,
    Boots = 2,
    Leggings = 3,
    Chestplate = 4,
    Helmet = 5,
}

impl EquipmentSlot {
    pub const ALL: [EquipmentSlot; 6] = [
        Self::MainHand,
        Self::OffHand,
        Self::Boots,
        Self::Leggings,
        Self::Chestplate,
        Self::Helmet,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::MainHand),
            1 => Some(Self::OffHand),
            2 => Some(Self::Boots),
            3 => Some(Self::Leggings),
            4 => Some(Self::Chestplate),
            5 => Some(Self::Helmet),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// An item shown in an equipment slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStack {
    /// Namespaced item key, e.g. `minecraft:iron_sword`
    pub item: String,
    pub count: u8,
    /// Render the enchantment glint
    pub enchanted: bool,
}

impl ItemStack {
    pub fn new(item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            count: 1,
            enchanted: false,
        }
    }

    pub fn air() -> Self {
        Self::new("minecraft:air")
    }

    pub fn is_air(&self) -> bool {
        self.item == "minecraft:air" || self.count == 0
    }
}

// =============================================================================
// Glow colour
// =============================================================================

/// Team colour used for the glow outline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum GlowColor {
    Black = 0,
    DarkBlue = 1,
    DarkGreen = 2,
    DarkAqua = 3,
    DarkRed = 4,
    DarkPurple = 5,
    Gold = 6,
    Gray = 7,
    DarkGray = 8,
    Blue = 9,
    Green = 10,
    Aqua = 11,
    Red = 12,
    LightPurple = 13,
    Yellow = 14,
    #[default]
    White = 15,
}

impl GlowColor {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}
