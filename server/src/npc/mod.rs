//! Per-viewer NPCs and the global NPCs that fan out to them.
//!
//! Every operation takes an [`NpcContext`] holding the host collaborators
//! for the current tick. Nothing here keeps a reference to the host.

pub mod attributes;
pub mod global;
pub mod hologram;
pub mod hooks;
pub mod interact;
pub mod personal;
pub mod skin;

pub use attributes::{
    AttributeDefaults, Attributes, FollowLook, MoveSpeed, ResolvedAttributes, TextOpacity,
};
pub use global::{GlobalNpc, Visibility};
pub use hologram::Hologram;
pub use hooks::{CommandSender, Decision, Listeners, NoHooks, NpcAction, NpcEvent, NpcHooks};
pub use interact::{ClickAction, ClickBinding, ClickEvent, ClickFilter, ClickKind, Interaction};
pub use personal::{FakeIdentity, PersonalNpc};
pub use skin::Skin;

use std::collections::HashMap;
use std::time::Instant;

use crate::config::NpcConfig;
use crate::error::NpcError;
use crate::math::{Location, Vec3};
use crate::protocol::ProtocolAdapter;
use crate::world::{WorldView, EYE_HEIGHT};

/// Host collaborators and clock for one call
pub struct NpcContext<'a> {
    pub protocol: &'a mut dyn ProtocolAdapter,
    pub world: &'a dyn WorldView,
    pub hooks: &'a dyn NpcHooks,
    pub config: &'a NpcConfig,
    pub defaults: &'a AttributeDefaults,
    /// Registry tick counter
    pub tick: u64,
    pub now: Instant,
    /// Locations of the NPCs a follow-NPC behaviour may target, by code
    pub npc_locations: &'a HashMap<String, Location>,
}

impl NpcContext<'_> {
    /// Ask the hooks, `Err(Vetoed)` on deny
    pub fn check(&self, event: NpcEvent<'_>) -> Result<(), NpcError> {
        if self.hooks.before(&event).is_denied() {
            Err(NpcError::Vetoed(event.action.name()))
        } else {
            Ok(())
        }
    }
}

/// Lifecycle shared by personal and global NPCs
pub trait Npc {
    fn code(&self) -> &str;

    fn location(&self) -> &Location;

    fn create(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError>;

    fn show(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError>;

    fn hide(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError>;

    /// Incremental refresh and range culling
    fn update(&mut self, ctx: &mut NpcContext<'_>);

    /// Respawn with everything re-sent
    fn force_update(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError>;

    fn teleport(&mut self, ctx: &mut NpcContext<'_>, to: Location) -> Result<(), NpcError>;

    /// Relative move, each axis below the per-packet bound
    fn move_by(&mut self, ctx: &mut NpcContext<'_>, delta: Vec3) -> Result<(), NpcError>;

    fn look_at(&mut self, ctx: &mut NpcContext<'_>, yaw: f32, pitch: f32);

    fn destroy(&mut self, ctx: &mut NpcContext<'_>);

    /// Look at a point in the same world
    fn look_at_point(&mut self, ctx: &mut NpcContext<'_>, point: &Location) -> Result<(), NpcError> {
        let here = self.location();
        if !here.same_world(point) {
            return Err(NpcError::WrongWorld(self.code().to_string(), point.world.clone()));
        }
        let eye = here.position() + Vec3::new(0.0, EYE_HEIGHT, 0.0);
        let (yaw, pitch) = crate::math::angles_toward(eye, point.position());
        self.look_at(ctx, yaw, pitch);
        Ok(())
    }
}

// =============================================================================
// Nearest-target scans
// =============================================================================

/// Eye position of the closest online viewer within `radius`
pub fn nearest_player(world: &dyn WorldView, from: &Location, radius: f64) -> Option<Vec3> {
    world
        .viewers()
        .into_iter()
        .filter_map(|v| v.location.distance_to(from).map(|d| (d, v.eye())))
        .filter(|(d, _)| *d <= radius)
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, eye)| eye)
}

/// Eye position of the closest real entity or viewer within `radius`
pub fn nearest_entity(world: &dyn WorldView, from: &Location, radius: f64) -> Option<Vec3> {
    let entities = world.entities_near(from, radius).into_iter().filter_map(|e| {
        e.location
            .distance_to(from)
            .map(|d| (d, e.location.position() + Vec3::new(0.0, e.eye_height, 0.0)))
    });
    let players = world
        .viewers()
        .into_iter()
        .filter_map(|v| v.location.distance_to(from).map(|d| (d, v.eye())))
        .filter(|(d, _)| *d <= radius);
    entities
        .chain(players)
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, eye)| eye)
}


#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;

    #[test]
    fn test_nearest_player_respects_radius_and_world() {
        let mut h = Harness::new();
        h.add_viewer(1, "near", Location::new("world", 3.0, 64.0, 0.0));
        h.add_viewer(2, "far", Location::new("world", 30.0, 64.0, 0.0));
        h.add_viewer(3, "elsewhere", Location::new("nether", 1.0, 64.0, 0.0));

        let from = Location::new("world", 0.0, 64.0, 0.0);
        let eye = nearest_player(&h.world, &from, 16.0).unwrap();
        assert_eq!(eye.x, 3.0);

        let from = Location::new("world", 100.0, 64.0, 0.0);
        assert!(nearest_player(&h.world, &from, 16.0).is_none());
    }

    #[test]
    fn test_look_at_point_stays_in_own_world() {
        let mut h = Harness::new();
        let viewer = h.add_viewer(1, "alice", Location::new("world", 0.5, 64.0, 8.5).with_look(180.0, 0.0));
        let mut npc = PersonalNpc::new("guide", viewer, Location::new("world", 0.5, 64.0, 0.5));
        npc.create(&mut h.ctx()).unwrap();
        npc.show(&mut h.ctx()).unwrap();
        h.sent(viewer);

        let elsewhere = Location::new("nether", 0.5, 64.0, 0.5);
        assert!(matches!(
            npc.look_at_point(&mut h.ctx(), &elsewhere),
            Err(NpcError::WrongWorld(..))
        ));
        assert!(h.sent(viewer).is_empty());

        let aside = Location::new("world", 10.5, 65.62, 0.5);
        npc.look_at_point(&mut h.ctx(), &aside).unwrap();
        assert!(h
            .sent(viewer)
            .iter()
            .any(|p| matches!(p, persona_shared::ServerPacket::HeadRotation { .. })));
    }
}
