//! Standalone host: the in-memory world, the outgoing packet queues and the
//! NPC manager, wired together the way the network layer drives them.

use std::time::Instant;

use log::{debug, warn};

use crate::math::Location;
use crate::protocol::PacketQueue;
use crate::registry::NpcManager;
use crate::world::{GridWorld, ViewerId, ViewerState, WorldView};

/// Everything the tick loop owns besides the socket
pub struct Host {
    pub world: GridWorld,
    pub packets: PacketQueue,
    pub npcs: NpcManager,
}

impl Host {
    pub fn new(world: GridWorld, npcs: NpcManager) -> Self {
        Self {
            world,
            packets: PacketQueue::new(),
            npcs,
        }
    }

    /// A viewer finished its handshake
    pub fn join(&mut self, state: ViewerState) {
        let id = state.id;
        self.world.upsert_viewer(state);
        self.packets.open(id);
        self.npcs.on_viewer_join(&mut self.packets, &self.world, id);
    }

    pub fn quit(&mut self, viewer: ViewerId) {
        self.npcs.on_viewer_quit(viewer);
        self.packets.close(viewer);
        self.world.remove_viewer(viewer);
    }

    /// Position update inside the viewer's current world
    pub fn move_viewer(&mut self, viewer: ViewerId, position: [f64; 3], yaw: f32, pitch: f32) {
        let Some(current) = self.world.viewer(viewer) else {
            return;
        };
        let [x, y, z] = position;
        let location = Location::new(current.location.world, x, y, z).with_look(yaw, pitch);
        self.world.move_viewer(viewer, location);
        self.npcs.on_viewer_move(&mut self.packets, &self.world, viewer);
    }

    pub fn change_world(&mut self, viewer: ViewerId, world: String, position: [f64; 3]) {
        let Some(current) = self.world.viewer(viewer) else {
            return;
        };
        if current.location.world == world {
            debug!("Viewer {} re-entered '{}'", viewer, world);
            return;
        }
        let [x, y, z] = position;
        let location = Location::new(world.clone(), x, y, z).with_look(current.location.yaw, current.location.pitch);
        if !self.world.move_viewer(viewer, location) {
            warn!("World change for unknown viewer {}", viewer);
            return;
        }
        self.npcs
            .on_world_change(&mut self.packets, &self.world, viewer, &current.location.world, &world);
    }

    pub fn tick(&mut self, now: Instant) {
        self.npcs.tick(&mut self.packets, &self.world, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NpcConfig;
    use crate::npc::{AttributeDefaults, Npc, Visibility};

    fn host_with_board() -> Host {
        let mut world = GridWorld::new();
        world.set_ground_level("world", 63);
        let mut host = Host::new(world, NpcManager::new(NpcConfig::default(), AttributeDefaults::default()));
        host.npcs
            .create_global("board", Location::new("world", 0.5, 64.0, 0.5), Visibility::Everyone)
            .unwrap();
        host.npcs
            .with_global(&mut host.packets, &host.world, "board", |npc, ctx| npc.create(ctx))
            .unwrap();
        host
    }

    fn viewer(id: u64, location: Location) -> ViewerState {
        ViewerState {
            id: ViewerId(id),
            name: format!("viewer{}", id),
            location,
            skin: None,
        }
    }

    #[test]
    fn test_join_spawns_globals_and_quit_closes_channel() {
        let mut host = host_with_board();
        host.join(viewer(1, Location::new("world", 0.5, 64.0, 8.5).with_look(180.0, 0.0)));
        assert!(!host.packets.pending(ViewerId(1)).is_empty());

        host.quit(ViewerId(1));
        assert!(!host.packets.is_open(ViewerId(1)));
        assert!(host.world.viewer(ViewerId(1)).is_none());
        assert!(!host.npcs.global("board").unwrap().has_viewer(ViewerId(1)));
    }

    #[test]
    fn test_walking_into_range_shows_global() {
        let mut host = host_with_board();
        host.join(viewer(1, Location::new("world", 0.5, 64.0, 80.5).with_look(180.0, 0.0)));
        let board = host.npcs.global("board").unwrap().personal(ViewerId(1)).unwrap();
        assert!(board.is_hidden_to_player());

        host.move_viewer(ViewerId(1), [0.5, 64.0, 10.5], 180.0, 0.0);
        let board = host.npcs.global("board").unwrap().personal(ViewerId(1)).unwrap();
        assert!(board.is_rendered());
    }

    #[test]
    fn test_world_change_parks_global() {
        let mut host = host_with_board();
        host.join(viewer(1, Location::new("world", 0.5, 64.0, 8.5).with_look(180.0, 0.0)));
        host.change_world(ViewerId(1), "nether".to_string(), [0.5, 64.0, 0.5]);

        let board = host.npcs.global("board").unwrap().personal(ViewerId(1)).unwrap();
        assert!(!board.can_see());
        assert!(host.npcs.session(ViewerId(1)).unwrap().is_parked("board"));
    }
}
