//! Outbound protocol adapter.
//!
//! The engine speaks only [`ServerPacket`]s. An adapter turns them into
//! whatever the host build puts on the wire and owns the entity id space.

use std::collections::{HashMap, VecDeque};
use log::warn;
use persona_shared::{EntityId, ServerPacket};

use crate::error::ProtocolError;
use crate::world::ViewerId;

/// First entity id handed out by [`PacketQueue`]; high so fake entities never
/// collide with the host's own ids
pub const FIRST_FAKE_ENTITY_ID: EntityId = 1_000_000;

/// One adapter per supported host build
pub trait ProtocolAdapter {
    /// Reserve a fresh entity id
    fn allocate_entity_id(&mut self) -> EntityId;

    /// Queue or send a packet to one viewer
    fn send(&mut self, viewer: ViewerId, packet: ServerPacket) -> Result<(), ProtocolError>;
}

/// Send a packet, logging and skipping on failure
pub fn send_or_log(protocol: &mut dyn ProtocolAdapter, viewer: ViewerId, packet: ServerPacket) {
    if let Err(e) = protocol.send(viewer, packet) {
        warn!("Skipped packet to viewer {}: {}", viewer, e);
    }
}

/// Per-viewer outgoing queues.
///
/// Packets to viewers without an open channel are rejected, so the engine
/// never builds up traffic for sessions that are gone.
#[derive(Debug)]
pub struct PacketQueue {
    queues: HashMap<ViewerId, VecDeque<ServerPacket>>,
    next_entity_id: EntityId,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            next_entity_id: FIRST_FAKE_ENTITY_ID,
        }
    }

    /// Start accepting packets for a viewer
    pub fn open(&mut self, viewer: ViewerId) {
        self.queues.entry(viewer).or_default();
    }

    /// Stop accepting packets and drop anything pending
    pub fn close(&mut self, viewer: ViewerId) {
        self.queues.remove(&viewer);
    }

    pub fn is_open(&self, viewer: ViewerId) -> bool {
        self.queues.contains_key(&viewer)
    }

    /// Take everything pending for a viewer
    pub fn drain(&mut self, viewer: ViewerId) -> Vec<ServerPacket> {
        self.queues
            .get_mut(&viewer)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Take everything pending, per viewer
    pub fn drain_all(&mut self) -> Vec<(ViewerId, Vec<ServerPacket>)> {
        let mut out: Vec<(ViewerId, Vec<ServerPacket>)> = self
            .queues
            .iter_mut()
            .filter(|(_, q)| !q.is_empty())
            .map(|(viewer, q)| (*viewer, q.drain(..).collect()))
            .collect();
        out.sort_by_key(|(viewer, _)| *viewer);
        out
    }

    /// Pending packets without draining
    pub fn pending(&self, viewer: ViewerId) -> Vec<&ServerPacket> {
        self.queues
            .get(&viewer)
            .map(|q| q.iter().collect())
            .unwrap_or_default()
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter for PacketQueue {
    fn allocate_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id = self.next_entity_id.wrapping_add(1).max(FIRST_FAKE_ENTITY_ID);
        id
    }

    fn send(&mut self, viewer: ViewerId, packet: ServerPacket) -> Result<(), ProtocolError> {
        match self.queues.get_mut(&viewer) {
            Some(queue) => {
                queue.push_back(packet);
                Ok(())
            }
            None => Err(ProtocolError::NoChannel(viewer)),
        }
    }
}
