//! Per-viewer NPC presence and movement engine.
//!
//! Fake player NPCs exist only on the clients that are meant to see them.
//! [`registry::NpcManager`] owns every NPC and is driven by the host's tick
//! loop; [`host`] and [`network`] are a small standalone host around it.

pub mod config;
pub mod error;
pub mod host;
pub mod math;
pub mod movement;
pub mod network;
pub mod npc;
pub mod protocol;
pub mod registry;
pub mod skins;
pub mod world;
