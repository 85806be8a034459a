//! Waypoint paths.

use crate::error::NpcError;
use crate::math::Location;

/// What happens once the last waypoint is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathKind {
    /// Stop and drop the behaviour
    #[default]
    Normal,
    /// Start over at the first waypoint
    Repetitive,
    /// Walk back to where the path was started, then stop
    BackToStart,
}

/// Where to go next
#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    MoveTo(Location),
    Finished,
}

/// Ordered waypoints with a cursor
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    waypoints: Vec<Location>,
    /// Index of the current waypoint, -1 before the first
    cursor: isize,
    kind: PathKind,
    /// Snapshot of the NPC position when the path started
    origin: Option<Location>,
    returning: bool,
}

impl Path {
    pub fn new(waypoints: Vec<Location>, kind: PathKind) -> Result<Self, NpcError> {
        if waypoints.is_empty() {
            return Err(NpcError::EmptyPath);
        }
        Ok(Self {
            waypoints,
            cursor: -1,
            kind,
            origin: None,
            returning: false,
        })
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn waypoints(&self) -> &[Location] {
        &self.waypoints
    }

    pub fn cursor(&self) -> isize {
        self.cursor
    }

    pub fn origin(&self) -> Option<&Location> {
        self.origin.as_ref()
    }

    /// Begin from `current`
    pub fn start(&mut self, current: &Location) -> PathStep {
        if self.origin.is_none() {
            self.origin = Some(current.clone());
        }
        self.advance()
    }

    /// Move the cursor on after the previous waypoint was reached
    pub fn advance(&mut self) -> PathStep {
        if self.returning {
            return PathStep::Finished;
        }
        self.cursor += 1;
        if let Some(next) = self.waypoints.get(self.cursor as usize) {
            return PathStep::MoveTo(next.clone());
        }
        match self.kind {
            PathKind::Normal => PathStep::Finished,
            PathKind::Repetitive => {
                self.cursor = -1;
                self.advance()
            }
            PathKind::BackToStart => match self.origin.clone() {
                Some(origin) => {
                    self.returning = true;
                    PathStep::MoveTo(origin)
                }
                None => PathStep::Finished,
            },
        }
    }
}
