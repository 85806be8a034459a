//! In-memory world: a flat ground level per world plus block overrides.
//!
//! Backs the demo host and the tests.

use std::collections::HashMap;
use log::debug;

use super::{Block, EntitySnapshot, HostEntityId, ViewerId, ViewerState, WorldView};
use crate::math::Location;

/// Ground level used for worlds without an explicit one
pub const DEFAULT_GROUND_LEVEL: i32 = 64;

/// A simple block grid
#[derive(Debug, Default)]
pub struct GridWorld {
    /// Highest solid y per world; everything at or below is `Solid`
    ground_levels: HashMap<String, i32>,
    /// Explicit blocks, override the ground fill
    blocks: HashMap<(String, i32, i32, i32), Block>,
    viewers: HashMap<ViewerId, ViewerState>,
    entities: HashMap<HostEntityId, EntitySnapshot>,
}

impl GridWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worlds are solid up to and including `y`
    pub fn set_ground_level(&mut self, world: &str, y: i32) {
        self.ground_levels.insert(world.to_string(), y);
    }

    pub fn ground_level(&self, world: &str) -> i32 {
        self.ground_levels.get(world).copied().unwrap_or(DEFAULT_GROUND_LEVEL)
    }

    pub fn set_block(&mut self, world: &str, x: i32, y: i32, z: i32, block: Block) {
        self.blocks.insert((world.to_string(), x, y, z), block);
    }

    /// Add or replace a viewer
    pub fn upsert_viewer(&mut self, viewer: ViewerState) {
        debug!("Viewer {} '{}' at {:?}", viewer.id, viewer.name, viewer.location);
        self.viewers.insert(viewer.id, viewer);
    }

    pub fn remove_viewer(&mut self, id: ViewerId) -> Option<ViewerState> {
        self.viewers.remove(&id)
    }

    /// Move an existing viewer, returns false if unknown
    pub fn move_viewer(&mut self, id: ViewerId, location: Location) -> bool {
        match self.viewers.get_mut(&id) {
            Some(viewer) => {
                viewer.location = location;
                true
            }
            None => false,
        }
    }

    pub fn upsert_entity(&mut self, entity: EntitySnapshot) {
        self.entities.insert(entity.id, entity);
    }

    pub fn remove_entity(&mut self, id: HostEntityId) {
        self.entities.remove(&id);
    }
}

impl WorldView for GridWorld {
    fn viewer(&self, id: ViewerId) -> Option<ViewerState> {
        self.viewers.get(&id).cloned()
    }

    fn viewers(&self) -> Vec<ViewerState> {
        let mut all: Vec<ViewerState> = self.viewers.values().cloned().collect();
        all.sort_by_key(|v| v.id);
        all
    }

    fn block_at(&self, world: &str, x: i32, y: i32, z: i32) -> Block {
        if let Some(block) = self.blocks.get(&(world.to_string(), x, y, z)) {
            return *block;
        }
        if y <= self.ground_level(world) {
            Block::Solid
        } else {
            Block::Air
        }
    }

    fn entity(&self, id: HostEntityId) -> Option<EntitySnapshot> {
        self.entities.get(&id).cloned()
    }

    fn entities_near(&self, center: &Location, radius: f64) -> Vec<EntitySnapshot> {
        self.entities
            .values()
            .filter(|e| {
                e.location
                    .distance_to(center)
                    .map(|d| d <= radius)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_fill_and_overrides() {
        let mut world = GridWorld::new();
        world.set_ground_level("world", 63);
        assert_eq!(world.block_at("world", 0, 63, 0), Block::Solid);
        assert_eq!(world.block_at("world", 0, 64, 0), Block::Air);

        world.set_block("world", 0, 64, 0, Block::Ladder);
        world.set_block("world", 0, 63, 0, Block::Water);
        assert_eq!(world.block_at("world", 0, 64, 0), Block::Ladder);
        assert_eq!(world.block_at("world", 0, 63, 0), Block::Water);

        // Unknown worlds use the default level
        assert_eq!(world.block_at("other", 0, DEFAULT_GROUND_LEVEL, 0), Block::Solid);
    }

    #[test]
    fn test_viewer_lookup_by_name() {
        let mut world = GridWorld::new();
        world.upsert_viewer(ViewerState {
            id: ViewerId(7),
            name: "Alex".to_string(),
            location: Location::new("world", 0.0, 64.0, 0.0),
            skin: None,
        });
        assert!(world.viewer_by_name("alex").is_some());
        assert!(world.viewer_by_name("steve").is_none());
        assert!(world.is_online(ViewerId(7)));
    }
}
