//! UDP front end of the standalone host.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use persona_shared::{ClientMessage, EntityId, Hand, InteractAction, PROTOCOL_VERSION};

use crate::host::Host;
use crate::math::Location;
use crate::npc::{Interaction, Skin};
use crate::world::{ViewerId, ViewerState};

/// Maximum packet size
const MAX_PACKET_SIZE: usize = 1200;

/// Connection timeout in seconds
const CONNECTION_TIMEOUT: f32 = 30.0;

/// Client connection state
#[derive(Debug)]
pub struct ClientConnection {
    pub addr: SocketAddr,
    pub viewer: ViewerId,
    pub name: String,
    pub last_seen: Instant,
}

impl ClientConnection {
    pub fn new(addr: SocketAddr, viewer: ViewerId, name: String) -> Self {
        Self {
            addr,
            viewer,
            name,
            last_seen: Instant::now(),
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_seen.elapsed().as_secs_f32() > CONNECTION_TIMEOUT
    }
}

/// A decoded datagram, stamped when it arrived
#[derive(Debug)]
pub struct Inbound {
    pub addr: SocketAddr,
    pub message: ClientMessage,
    pub received_at: Instant,
}

/// Viewer-facing server
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: HashMap<SocketAddr, ClientConnection>,
    viewer_to_addr: HashMap<ViewerId, SocketAddr>,
    next_viewer_id: u64,
    /// Filled by the receive task
    inbound: mpsc::UnboundedReceiver<Inbound>,
    /// Clicks go to the NPC manager through its channel, never directly
    interactions: mpsc::UnboundedSender<Interaction>,
}

impl Server {
    /// Create a new server listening on the given port
    pub async fn new(port: u16, interactions: mpsc::UnboundedSender<Interaction>) -> Result<Self, std::io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let socket = Arc::new(UdpSocket::bind(&addr).await?);

        let (tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(receive_task(socket.clone(), tx));

        Ok(Self {
            socket,
            clients: HashMap::new(),
            viewer_to_addr: HashMap::new(),
            next_viewer_id: 1,
            inbound,
            interactions,
        })
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Handle everything the receive task decoded since the last tick
    pub fn process_incoming(&mut self, host: &mut Host) {
        while let Ok(inbound) = self.inbound.try_recv() {
            self.handle_message(inbound, host);
        }

        self.check_timeouts(host);
    }

    fn handle_message(&mut self, inbound: Inbound, host: &mut Host) {
        let Inbound { addr, message, received_at } = inbound;

        if let Some(client) = self.clients.get_mut(&addr) {
            client.last_seen = received_at;
        }

        match message {
            ClientMessage::Hello { protocol_version, name, world, position, yaw, pitch, texture, signature } => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        "Rejected {} from {}: protocol {} (server speaks {})",
                        name, addr, protocol_version, PROTOCOL_VERSION
                    );
                    return;
                }
                let [x, y, z] = position;
                let location = Location::new(world, x, y, z).with_look(yaw, pitch);
                let skin = texture.map(|t| Skin::from_player(name.clone(), t, signature.unwrap_or_default()));
                self.handle_hello(addr, name, location, skin, host);
            }
            ClientMessage::Move { position, yaw, pitch } => {
                if let Some(viewer) = self.viewer_of(addr) {
                    host.move_viewer(viewer, position, yaw, pitch);
                }
            }
            ClientMessage::ChangeWorld { world, position } => {
                if let Some(viewer) = self.viewer_of(addr) {
                    host.change_world(viewer, world, position);
                }
            }
            ClientMessage::Interact { entity_id, action, hand, .. } => {
                self.handle_interact(addr, entity_id, action, hand, received_at);
            }
            ClientMessage::Disconnect => {
                self.handle_disconnect(addr, host);
            }
        }
    }

    fn viewer_of(&self, addr: SocketAddr) -> Option<ViewerId> {
        self.clients.get(&addr).map(|c| c.viewer)
    }

    fn handle_hello(&mut self, addr: SocketAddr, name: String, location: Location, skin: Option<Skin>, host: &mut Host) {
        if self.clients.contains_key(&addr) {
            debug!("Duplicate hello from {}", addr);
            return;
        }
        let viewer = ViewerId(self.next_viewer_id);
        self.next_viewer_id += 1;

        info!("Viewer '{}' connected from {} as {}", name, addr, viewer);
        self.clients.insert(addr, ClientConnection::new(addr, viewer, name.clone()));
        self.viewer_to_addr.insert(viewer, addr);
        host.join(ViewerState { id: viewer, name, location, skin });
    }

    /// Decode here, dispatch on the manager's next tick
    fn handle_interact(
        &self,
        addr: SocketAddr,
        entity_id: EntityId,
        action: InteractAction,
        hand: Hand,
        received_at: Instant,
    ) {
        let Some(viewer) = self.viewer_of(addr) else {
            return;
        };
        let Some(interaction) = Interaction::decode(viewer, entity_id, action, hand, received_at) else {
            return;
        };
        if self.interactions.send(interaction).is_err() {
            warn!("NPC manager is gone, dropped click of viewer {}", viewer);
        }
    }

    fn handle_disconnect(&mut self, addr: SocketAddr, host: &mut Host) {
        if let Some(connection) = self.clients.remove(&addr) {
            self.viewer_to_addr.remove(&connection.viewer);
            host.quit(connection.viewer);
            info!("Viewer '{}' ({}) disconnected", connection.name, connection.viewer);
        }
    }

    /// Check for timed out connections
    fn check_timeouts(&mut self, host: &mut Host) {
        let timed_out: Vec<SocketAddr> = self
            .clients
            .iter()
            .filter(|(_, c)| c.is_timed_out())
            .map(|(addr, _)| *addr)
            .collect();

        for addr in timed_out {
            if let Some(connection) = self.clients.remove(&addr) {
                warn!("Viewer '{}' timed out", connection.name);
                self.viewer_to_addr.remove(&connection.viewer);
                host.quit(connection.viewer);
            }
        }
    }

    /// Send everything the NPC manager queued this tick
    pub async fn process_outgoing(&mut self, host: &mut Host) {
        for (viewer, packets) in host.packets.drain_all() {
            let Some(addr) = self.viewer_to_addr.get(&viewer).copied() else {
                continue;
            };
            for packet in packets {
                match packet.serialize() {
                    Ok(data) => {
                        if data.len() > MAX_PACKET_SIZE {
                            warn!("Packet for {} is {} bytes, may be fragmented", viewer, data.len());
                        }
                        if let Err(e) = self.socket.send_to(&data, addr).await {
                            error!("Failed to send to {}: {}", addr, e);
                        }
                    }
                    Err(e) => error!("Failed to encode packet for {}: {}", viewer, e),
                }
            }
        }
    }
}

/// Decode a datagram, `None` (logged) if it is not a client message
fn decode(data: &[u8], addr: SocketAddr) -> Option<ClientMessage> {
    match ClientMessage::deserialize(data) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("Failed to deserialize packet from {}: {}", addr, e);
            None
        }
    }
}

/// Receives and decodes datagrams off the tick loop
async fn receive_task(socket: Arc<UdpSocket>, tx: mpsc::UnboundedSender<Inbound>) {
    let mut buf = [0u8; MAX_PACKET_SIZE];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, addr)) => {
                let Some(message) = decode(&buf[..len], addr) else {
                    continue;
                };
                let inbound = Inbound { addr, message, received_at: Instant::now() };
                if tx.send(inbound).is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("Error receiving packet: {}", e);
            }
        }
    }

    info!("Receive task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NpcConfig;
    use crate::npc::{AttributeDefaults, ClickKind};
    use crate::registry::NpcManager;
    use crate::world::GridWorld;

    fn host() -> Host {
        Host::new(GridWorld::new(), NpcManager::new(NpcConfig::default(), AttributeDefaults::default()))
    }

    fn inbound(addr: SocketAddr, message: ClientMessage) -> Inbound {
        Inbound { addr, message, received_at: Instant::now() }
    }

    fn hello(name: &str) -> ClientMessage {
        ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            name: name.to_string(),
            world: "world".to_string(),
            position: [0.5, 65.0, 0.5],
            yaw: 0.0,
            pitch: 0.0,
            texture: None,
            signature: None,
        }
    }

    #[tokio::test]
    async fn test_hello_interact_and_disconnect() {
        let mut host = host();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut server = Server::new(0, tx).await.unwrap();
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        server.handle_message(inbound(addr, hello("alice")), &mut host);
        assert_eq!(server.client_count(), 1);
        let viewer = server.viewer_of(addr).unwrap();
        assert!(host.packets.is_open(viewer));

        let click = ClientMessage::Interact {
            entity_id: 1_000_000,
            action: InteractAction::Attack,
            hand: Hand::Main,
            sneaking: false,
        };
        server.handle_message(inbound(addr, click), &mut host);
        let interaction = rx.try_recv().unwrap();
        assert_eq!(interaction.viewer, viewer);
        assert_eq!(interaction.click, ClickKind::Left);

        server.handle_message(inbound(addr, ClientMessage::Disconnect), &mut host);
        assert_eq!(server.client_count(), 0);
        assert!(!host.packets.is_open(viewer));
    }

    #[tokio::test]
    async fn test_wrong_protocol_and_garbage_are_rejected() {
        let mut host = host();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut server = Server::new(0, tx).await.unwrap();
        let addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();

        let old = ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION + 1,
            name: "bob".to_string(),
            world: "world".to_string(),
            position: [0.0; 3],
            yaw: 0.0,
            pitch: 0.0,
            texture: None,
            signature: None,
        };
        server.handle_message(inbound(addr, old), &mut host);
        assert_eq!(server.client_count(), 0);
        assert!(decode(&[0xff, 0x01], addr).is_none());
    }
}
