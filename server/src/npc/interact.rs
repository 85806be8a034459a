//! Clicks on NPCs and the actions bound to them.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use persona_shared::{EntityId, Hand, InteractAction, ServerPacket};

use super::hooks::{CommandSender, NpcHooks};
use crate::protocol::{send_or_log, ProtocolAdapter};
use crate::world::ViewerId;

/// Proxy plugin channel
pub const PROXY_CHANNEL: &str = "BungeeCord";

/// Which button a viewer clicked with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClickKind {
    Right,
    Left,
}

/// Which clicks an action reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClickFilter {
    #[default]
    Any,
    Right,
    Left,
}

impl ClickFilter {
    pub fn matches(&self, click: ClickKind) -> bool {
        match self {
            Self::Any => true,
            Self::Right => click == ClickKind::Right,
            Self::Left => click == ClickKind::Left,
        }
    }
}

/// A decoded, not yet debounced click
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interaction {
    pub viewer: ViewerId,
    pub entity_id: EntityId,
    pub click: ClickKind,
    pub received_at: Instant,
}

impl Interaction {
    /// Decode a use-entity packet. Off-hand duplicates yield `None`.
    pub fn decode(
        viewer: ViewerId,
        entity_id: EntityId,
        action: InteractAction,
        hand: Hand,
        received_at: Instant,
    ) -> Option<Self> {
        let click = match (action, hand) {
            (InteractAction::Attack, _) => ClickKind::Left,
            (_, Hand::Off) => return None,
            (InteractAction::Interact, Hand::Main) | (InteractAction::InteractAt { .. }, Hand::Main) => {
                ClickKind::Right
            }
        };
        Some(Self { viewer, entity_id, click, received_at })
    }
}

/// What a custom action gets to see
#[derive(Debug, Clone)]
pub struct ClickEvent {
    pub code: String,
    pub viewer: ViewerId,
    pub viewer_name: String,
    pub click: ClickKind,
}

pub type CustomAction = Arc<dyn Fn(&ClickEvent) + Send + Sync>;

/// Something that happens when an NPC is clicked
#[derive(Clone)]
pub enum ClickAction {
    Message(String),
    ActionBar(String),
    Title {
        title: String,
        subtitle: String,
        fade_in: u32,
        stay: u32,
        fade_out: u32,
    },
    /// Run as the clicking viewer
    PlayerCommand(String),
    ConsoleCommand(String),
    /// Send the viewer to another proxy server
    ConnectServer(String),
    Custom(CustomAction),
}

impl fmt::Debug for ClickAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(t) => f.debug_tuple("Message").field(t).finish(),
            Self::ActionBar(t) => f.debug_tuple("ActionBar").field(t).finish(),
            Self::Title { title, subtitle, .. } => f
                .debug_struct("Title")
                .field("title", title)
                .field("subtitle", subtitle)
                .finish(),
            Self::PlayerCommand(c) => f.debug_tuple("PlayerCommand").field(c).finish(),
            Self::ConsoleCommand(c) => f.debug_tuple("ConsoleCommand").field(c).finish(),
            Self::ConnectServer(s) => f.debug_tuple("ConnectServer").field(s).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// An action plus the clicks it reacts to
#[derive(Debug, Clone)]
pub struct ClickBinding {
    pub filter: ClickFilter,
    pub action: ClickAction,
}

impl ClickBinding {
    pub fn new(filter: ClickFilter, action: ClickAction) -> Self {
        Self { filter, action }
    }
}

/// Replace `{player}` and `{npc}`
pub fn apply_placeholders(text: &str, event: &ClickEvent) -> String {
    text.replace("{player}", &event.viewer_name).replace("{npc}", &event.code)
}

/// Proxy "Connect" payload: two length-prefixed UTF strings
pub fn connect_payload(server: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(9 + server.len());
    write_utf(&mut data, "Connect");
    write_utf(&mut data, server);
    data
}

fn write_utf(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&bytes[..len]);
}

/// Run every binding that matches the click, in order
pub fn run_actions(
    bindings: &[ClickBinding],
    event: &ClickEvent,
    protocol: &mut dyn ProtocolAdapter,
    hooks: &dyn NpcHooks,
) {
    for binding in bindings.iter().filter(|b| b.filter.matches(event.click)) {
        match &binding.action {
            ClickAction::Message(text) => send_or_log(
                protocol,
                event.viewer,
                ServerPacket::Chat { text: apply_placeholders(text, event) },
            ),
            ClickAction::ActionBar(text) => send_or_log(
                protocol,
                event.viewer,
                ServerPacket::ActionBar { text: apply_placeholders(text, event) },
            ),
            ClickAction::Title { title, subtitle, fade_in, stay, fade_out } => send_or_log(
                protocol,
                event.viewer,
                ServerPacket::Title {
                    title: apply_placeholders(title, event),
                    subtitle: apply_placeholders(subtitle, event),
                    fade_in: *fade_in,
                    stay: *stay,
                    fade_out: *fade_out,
                },
            ),
            ClickAction::PlayerCommand(cmd) => {
                hooks.run_command(CommandSender::Player(event.viewer), &apply_placeholders(cmd, event))
            }
            ClickAction::ConsoleCommand(cmd) => {
                hooks.run_command(CommandSender::Console, &apply_placeholders(cmd, event))
            }
            ClickAction::ConnectServer(server) => send_or_log(
                protocol,
                event.viewer,
                ServerPacket::PluginMessage {
                    channel: PROXY_CHANNEL.to_string(),
                    data: connect_payload(server),
                },
            ),
            ClickAction::Custom(f) => f(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketQueue;
    use crate::npc::hooks::NoHooks;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(click: ClickKind) -> ClickEvent {
        ClickEvent {
            code: "guide".to_string(),
            viewer: ViewerId(1),
            viewer_name: "Alex".to_string(),
            click,
        }
    }

    #[test]
    fn test_decode_click_kinds() {
        let now = Instant::now();
        let v = ViewerId(1);
        let left = Interaction::decode(v, 5, InteractAction::Attack, Hand::Main, now).unwrap();
        assert_eq!(left.click, ClickKind::Left);

        let right = Interaction::decode(v, 5, InteractAction::InteractAt { target: [0.0; 3] }, Hand::Main, now)
            .unwrap();
        assert_eq!(right.click, ClickKind::Right);

        assert!(Interaction::decode(v, 5, InteractAction::Interact, Hand::Off, now).is_none());
    }

    #[test]
    fn test_filtered_actions_with_placeholders() {
        let mut queue = PacketQueue::new();
        queue.open(ViewerId(1));
        let custom_runs = Arc::new(AtomicUsize::new(0));
        let counter = custom_runs.clone();

        let bindings = vec![
            ClickBinding::new(ClickFilter::Right, ClickAction::Message("Hi {player}, I am {npc}".into())),
            ClickBinding::new(ClickFilter::Left, ClickAction::ActionBar("left".into())),
            ClickBinding::new(
                ClickFilter::Any,
                ClickAction::Custom(Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            ),
        ];

        run_actions(&bindings, &event(ClickKind::Right), &mut queue, &NoHooks);

        let sent = queue.drain(ViewerId(1));
        assert_eq!(sent, vec![ServerPacket::Chat { text: "Hi Alex, I am guide".to_string() }]);
        assert_eq!(custom_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_payload_layout() {
        let data = connect_payload("lobby");
        assert_eq!(&data[..2], &[0, 7]);
        assert_eq!(&data[2..9], b"Connect");
        assert_eq!(&data[9..11], &[0, 5]);
        assert_eq!(&data[11..], b"lobby");
    }
}
