//! Long-running movement directors.

use super::path::Path;
use super::task::MoveOptions;
use crate::math::Location;
use crate::npc::NpcContext;
use crate::world::{HostEntityId, ViewerId};

/// Closer than this the follower waits
pub const DEFAULT_MIN_DISTANCE: f64 = 3.0;

/// Further than this the follower teleports
pub const DEFAULT_MAX_DISTANCE: f64 = 50.0;

/// What the NPC is doing on its own
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BehaviourKind {
    #[default]
    None,
    FollowPlayer(ViewerId),
    FollowEntity(HostEntityId),
    /// Another NPC, by code
    FollowNpc(String),
    CustomPath(Path),
}

impl BehaviourKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FollowPlayer(_) => "follow player",
            Self::FollowEntity(_) => "follow entity",
            Self::FollowNpc(_) => "follow npc",
            Self::CustomPath(_) => "custom path",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveBehaviour {
    pub kind: BehaviourKind,
    pub min_distance: f64,
    pub max_distance: f64,
    /// Options of the tasks this behaviour starts
    pub options: MoveOptions,
}

impl Default for MoveBehaviour {
    fn default() -> Self {
        Self::new(BehaviourKind::None)
    }
}

impl MoveBehaviour {
    pub fn new(kind: BehaviourKind) -> Self {
        Self {
            kind,
            min_distance: DEFAULT_MIN_DISTANCE,
            max_distance: DEFAULT_MAX_DISTANCE,
            options: MoveOptions::default(),
        }
    }

    pub fn with_distances(mut self, min: f64, max: f64) -> Self {
        self.min_distance = min;
        self.max_distance = max.max(min);
        self
    }

    pub fn is_none(&self) -> bool {
        matches!(self.kind, BehaviourKind::None)
    }

    pub fn is_path(&self) -> bool {
        matches!(self.kind, BehaviourKind::CustomPath(_))
    }

    pub fn is_follow(&self) -> bool {
        matches!(
            self.kind,
            BehaviourKind::FollowPlayer(_) | BehaviourKind::FollowEntity(_) | BehaviourKind::FollowNpc(_)
        )
    }

    /// Current location of the follow target, `None` if it is gone
    pub fn follow_target(&self, ctx: &NpcContext<'_>) -> Option<Location> {
        match &self.kind {
            BehaviourKind::FollowPlayer(viewer) => ctx.world.viewer(*viewer).map(|v| v.location),
            BehaviourKind::FollowEntity(id) => ctx.world.entity(*id).map(|e| e.location),
            BehaviourKind::FollowNpc(code) => ctx.npc_locations.get(code).cloned(),
            BehaviourKind::None | BehaviourKind::CustomPath(_) => None,
        }
    }
}
