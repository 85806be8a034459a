//! Error types.

use thiserror::Error;

use crate::world::ViewerId;

/// Failures of NPC operations.
///
/// Every variant is returned before any state change or wire traffic.
#[derive(Debug, Error)]
pub enum NpcError {
    #[error("npc '{0}' has not been created")]
    NotCreated(String),

    #[error("npc '{0}' is already created")]
    AlreadyCreated(String),

    #[error("npc code '{0}' is already in use")]
    DuplicateCode(String),

    #[error("unknown npc '{0}'")]
    UnknownNpc(String),

    #[error("viewer {0} is not online")]
    ViewerOffline(ViewerId),

    #[error("viewer {0} is not allowed to see global npc '{1}'")]
    ViewerNotAllowed(ViewerId, String),

    #[error("hide distance must be greater than 0 (got {0})")]
    InvalidHideDistance(f64),

    #[error("move speed must be greater than 0 (got {0})")]
    InvalidMoveSpeed(f64),

    #[error("tab list name '{name}' is {len} characters long (max 16)")]
    TabListNameTooLong { name: String, len: usize },

    #[error("relative move ({dx:.3}, {dy:.3}, {dz:.3}) exceeds the per-tick bound")]
    MoveTooLarge { dx: f64, dy: f64, dz: f64 },

    #[error("npc '{0}' is not in world '{1}'")]
    WrongWorld(String, String),

    #[error("hologram line {0} does not exist")]
    UnknownLine(u32),

    #[error("{0} was cancelled by a listener")]
    Vetoed(&'static str),

    #[error("path has no waypoints")]
    EmptyPath,

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failures of the protocol adapter. Always logged and skipped, never
/// propagated into the tick.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("viewer {0} has no open channel")]
    NoChannel(ViewerId),
}
