//! Listener hooks.
//!
//! Lifecycle actions ask the hooks first and are abandoned on
//! [`Decision::Deny`] before any state changes or packets are sent.

use std::fmt;
use log::debug;

use super::interact::ClickKind;
use crate::math::{Location, Vec3};
use crate::world::ViewerId;

/// Answer of a pre-action hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_denied(&self) -> bool {
        matches!(self, Decision::Deny)
    }
}

/// Action about to happen
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NpcAction<'a> {
    Show,
    Hide,
    Move { delta: Vec3 },
    Teleport { to: &'a Location },
    PathStart,
}

impl NpcAction<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Hide => "hide",
            Self::Move { .. } => "move",
            Self::Teleport { .. } => "teleport",
            Self::PathStart => "path start",
        }
    }
}

/// Pre-action notification
#[derive(Debug, Clone, Copy)]
pub struct NpcEvent<'a> {
    pub code: &'a str,
    /// `None` for actions of a global NPC as a whole
    pub viewer: Option<ViewerId>,
    pub action: NpcAction<'a>,
}

/// Who runs a command fired by a click action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSender {
    Player(ViewerId),
    Console,
}

impl fmt::Display for CommandSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player(id) => write!(f, "player {}", id),
            Self::Console => write!(f, "console"),
        }
    }
}

/// Host callbacks. Every method has a permissive default.
pub trait NpcHooks {
    fn before(&self, _event: &NpcEvent<'_>) -> Decision {
        Decision::Allow
    }

    /// A debounced click reached an NPC
    fn on_interact(&self, _code: &str, _viewer: ViewerId, _click: ClickKind) {}

    /// Run a command on behalf of a viewer or the console
    fn run_command(&self, sender: CommandSender, command: &str) {
        debug!("No command runner, dropping '{}' from {}", command, sender);
    }
}

/// Hooks that allow everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl NpcHooks for NoHooks {}

type VetoFn = Box<dyn Fn(&NpcEvent<'_>) -> Decision>;
type InteractFn = Box<dyn Fn(&str, ViewerId, ClickKind)>;
type CommandFn = Box<dyn Fn(CommandSender, &str)>;

/// Closure-based hooks; any registered veto listener can deny
#[derive(Default)]
pub struct Listeners {
    vetoes: Vec<VetoFn>,
    interacts: Vec<InteractFn>,
    commands: Vec<CommandFn>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before<F>(&mut self, f: F)
    where
        F: Fn(&NpcEvent<'_>) -> Decision + 'static,
    {
        self.vetoes.push(Box::new(f));
    }

    pub fn on_click<F>(&mut self, f: F)
    where
        F: Fn(&str, ViewerId, ClickKind) + 'static,
    {
        self.interacts.push(Box::new(f));
    }

    pub fn on_command<F>(&mut self, f: F)
    where
        F: Fn(CommandSender, &str) + 'static,
    {
        self.commands.push(Box::new(f));
    }
}

impl NpcHooks for Listeners {
    fn before(&self, event: &NpcEvent<'_>) -> Decision {
        if self.vetoes.iter().any(|f| f(event).is_denied()) {
            debug!("{} of '{}' denied by a listener", event.action.name(), event.code);
            Decision::Deny
        } else {
            Decision::Allow
        }
    }

    fn on_interact(&self, code: &str, viewer: ViewerId, click: ClickKind) {
        for f in &self.interacts {
            f(code, viewer, click);
        }
    }

    fn run_command(&self, sender: CommandSender, command: &str) {
        if self.commands.is_empty() {
            debug!("No command runner, dropping '{}' from {}", command, sender);
        }
        for f in &self.commands {
            f(sender, command);
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("vetoes", &self.vetoes.len())
            .field("interacts", &self.interacts.len())
            .field("commands", &self.commands.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_any_listener_can_deny() {
        let mut listeners = Listeners::new();
        listeners.on_before(|_| Decision::Allow);
        listeners.on_before(|e| {
            if matches!(e.action, NpcAction::Hide) {
                Decision::Deny
            } else {
                Decision::Allow
            }
        });

        let show = NpcEvent { code: "a", viewer: None, action: NpcAction::Show };
        let hide = NpcEvent { code: "a", viewer: None, action: NpcAction::Hide };
        assert_eq!(listeners.before(&show), Decision::Allow);
        assert_eq!(listeners.before(&hide), Decision::Deny);
    }

    #[test]
    fn test_commands_reach_every_runner() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut listeners = Listeners::new();
        let sink = seen.clone();
        listeners.on_command(move |sender, cmd| sink.borrow_mut().push((sender, cmd.to_string())));

        listeners.run_command(CommandSender::Console, "say hi");
        assert_eq!(seen.borrow().as_slice(), &[(CommandSender::Console, "say hi".to_string())]);
    }

    #[test]
    fn test_click_listeners_receive_interactions() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut listeners = Listeners::new();
        let sink = seen.clone();
        listeners.on_click(move |code, viewer, click| sink.borrow_mut().push((code.to_string(), viewer, click)));

        let hooks: &dyn NpcHooks = &listeners;
        hooks.on_interact("guide", ViewerId(7), ClickKind::Right);
        assert_eq!(seen.borrow().as_slice(), &[("guide".to_string(), ViewerId(7), ClickKind::Right)]);
    }
}
