//! Viewer sessions and the NPCs that belong to them.
//!
//! [`NpcManager`] is the single owner of all NPC state. The host calls it
//! from its main loop with the protocol adapter and world view for that
//! call; interactions arrive from I/O threads over a channel and are
//! dispatched on the following tick.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use persona_shared::EntityId;
use tokio::sync::mpsc;

use crate::config::{NpcConfig, UpdateMode};
use crate::error::NpcError;
use crate::math::Location;
use crate::npc::interact::run_actions;
use crate::npc::{
    AttributeDefaults, ClickBinding, ClickEvent, GlobalNpc, Interaction, NoHooks, Npc, NpcContext, NpcHooks, PersonalNpc, Skin,
    Visibility,
};
use crate::protocol::ProtocolAdapter;
use crate::skins::{SkinFetched, SkinFetcher, SkinResults, SkinTarget};
use crate::world::{ViewerId, WorldView};

/// Builds the context for one registry call from the manager's own fields,
/// leaving `sessions` and `globals` free to borrow mutably.
macro_rules! context {
    ($self:ident, $protocol:expr, $world:expr, $locations:expr) => {
        NpcContext {
            protocol: $protocol,
            world: $world,
            hooks: $self.hooks.as_ref(),
            config: &$self.config,
            defaults: &$self.defaults,
            tick: $self.tick,
            now: $self.now,
            npc_locations: $locations,
        }
    };
}

/// Which NPC an interaction debounce entry belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NpcKey {
    Personal(ViewerId, String),
    Global(String),
}

/// NPCs and bookkeeping of one online viewer
#[derive(Debug)]
pub struct ViewerSession {
    name: String,
    world: String,
    npcs: BTreeMap<String, PersonalNpc>,
    /// Personal NPCs force-hidden by a world change
    parked: BTreeSet<String>,
    /// Global NPCs force-hidden by a world change
    parked_globals: BTreeSet<String>,
    last_block: Option<(i32, i32, i32)>,
}

impl ViewerSession {
    fn new(name: String, world: String) -> Self {
        Self {
            name,
            world,
            npcs: BTreeMap::new(),
            parked: BTreeSet::new(),
            parked_globals: BTreeSet::new(),
            last_block: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn world(&self) -> &str {
        &self.world
    }

    pub fn npcs(&self) -> impl Iterator<Item = &PersonalNpc> {
        self.npcs.values()
    }

    pub fn is_parked(&self, code: &str) -> bool {
        self.parked.contains(code) || self.parked_globals.contains(code)
    }

    fn locations(&self) -> HashMap<String, Location> {
        self.npcs
            .iter()
            .map(|(code, npc)| (code.clone(), npc.location().clone()))
            .collect()
    }
}

/// Owner of every NPC, driven by the host's tick loop
pub struct NpcManager {
    config: NpcConfig,
    defaults: AttributeDefaults,
    hooks: Box<dyn NpcHooks>,
    tick: u64,
    now: Instant,
    sessions: HashMap<ViewerId, ViewerSession>,
    globals: BTreeMap<String, GlobalNpc>,
    last_interact: HashMap<(NpcKey, ViewerId), Instant>,
    interactions_tx: mpsc::UnboundedSender<Interaction>,
    interactions_rx: mpsc::UnboundedReceiver<Interaction>,
    /// Received last tick, dispatched this tick
    deferred: Vec<Interaction>,
    skins: Option<(SkinFetcher, SkinResults)>,
}

impl NpcManager {
    pub fn new(config: NpcConfig, defaults: AttributeDefaults) -> Self {
        let (interactions_tx, interactions_rx) = mpsc::unbounded_channel();
        Self {
            config,
            defaults,
            hooks: Box::new(NoHooks),
            tick: 0,
            now: Instant::now(),
            sessions: HashMap::new(),
            globals: BTreeMap::new(),
            last_interact: HashMap::new(),
            interactions_tx,
            interactions_rx,
            deferred: Vec::new(),
            skins: None,
        }
    }

    pub fn set_hooks(&mut self, hooks: Box<dyn NpcHooks>) {
        self.hooks = hooks;
    }

    pub fn set_skin_fetcher(&mut self, fetcher: SkinFetcher, results: SkinResults) {
        self.skins = Some((fetcher, results));
    }

    pub fn config(&self) -> &NpcConfig {
        &self.config
    }

    pub fn defaults(&self) -> &AttributeDefaults {
        &self.defaults
    }

    /// Template unset attributes resolve to, for NPCs updated after the change
    pub fn defaults_mut(&mut self) -> &mut AttributeDefaults {
        &mut self.defaults
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Handle for I/O threads to report decoded clicks
    pub fn interaction_sender(&self) -> mpsc::UnboundedSender<Interaction> {
        self.interactions_tx.clone()
    }

    pub fn session(&self, viewer: ViewerId) -> Option<&ViewerSession> {
        self.sessions.get(&viewer)
    }

    // =========================================================================
    // NPC lookup
    // =========================================================================

    /// Register a personal NPC; it still has to be created and shown
    pub fn create_personal(
        &mut self,
        viewer: ViewerId,
        code: impl Into<String>,
        location: Location,
    ) -> Result<&mut PersonalNpc, NpcError> {
        let code = code.into();
        let session = self.sessions.get_mut(&viewer).ok_or(NpcError::ViewerOffline(viewer))?;
        if session.npcs.contains_key(&code) {
            return Err(NpcError::DuplicateCode(code));
        }
        debug!("Registered '{}' for viewer {}", code, viewer);
        Ok(session
            .npcs
            .entry(code.clone())
            .or_insert_with(|| PersonalNpc::new(code, viewer, location)))
    }

    pub fn personal(&self, viewer: ViewerId, code: &str) -> Option<&PersonalNpc> {
        self.sessions.get(&viewer)?.npcs.get(code)
    }

    pub fn personal_mut(&mut self, viewer: ViewerId, code: &str) -> Option<&mut PersonalNpc> {
        self.sessions.get_mut(&viewer)?.npcs.get_mut(code)
    }

    /// Run a lifecycle call on a personal NPC with a context for this call
    pub fn with_personal<T, F>(
        &mut self,
        protocol: &mut dyn ProtocolAdapter,
        world: &dyn WorldView,
        viewer: ViewerId,
        code: &str,
        f: F,
    ) -> Result<T, NpcError>
    where
        F: FnOnce(&mut PersonalNpc, &mut NpcContext<'_>) -> Result<T, NpcError>,
    {
        let session = self.sessions.get_mut(&viewer).ok_or(NpcError::ViewerOffline(viewer))?;
        let locations = session.locations();
        let npc = session
            .npcs
            .get_mut(code)
            .ok_or_else(|| NpcError::UnknownNpc(code.to_string()))?;
        let mut ctx = context!(self, protocol, world, &locations);
        f(npc, &mut ctx)
    }

    /// Destroy and forget a personal NPC
    pub fn remove_personal(
        &mut self,
        protocol: &mut dyn ProtocolAdapter,
        world: &dyn WorldView,
        viewer: ViewerId,
        code: &str,
    ) -> Result<(), NpcError> {
        let session = self.sessions.get_mut(&viewer).ok_or(NpcError::ViewerOffline(viewer))?;
        let mut npc = session
            .npcs
            .remove(code)
            .ok_or_else(|| NpcError::UnknownNpc(code.to_string()))?;
        session.parked.remove(code);
        let locations = HashMap::new();
        let mut ctx = context!(self, protocol, world, &locations);
        npc.destroy(&mut ctx);
        self.last_interact
            .retain(|(key, _), _| *key != NpcKey::Personal(viewer, code.to_string()));
        Ok(())
    }

    /// Register a global NPC; it still has to be created
    pub fn create_global(
        &mut self,
        code: impl Into<String>,
        location: Location,
        visibility: Visibility,
    ) -> Result<&mut GlobalNpc, NpcError> {
        let code = code.into();
        if self.globals.contains_key(&code) {
            return Err(NpcError::DuplicateCode(code));
        }
        info!("Registered global '{}'", code);
        Ok(self
            .globals
            .entry(code.clone())
            .or_insert_with(|| GlobalNpc::new(code, location, visibility)))
    }

    pub fn global(&self, code: &str) -> Option<&GlobalNpc> {
        self.globals.get(code)
    }

    pub fn global_mut(&mut self, code: &str) -> Option<&mut GlobalNpc> {
        self.globals.get_mut(code)
    }

    pub fn with_global<T, F>(
        &mut self,
        protocol: &mut dyn ProtocolAdapter,
        world: &dyn WorldView,
        code: &str,
        f: F,
    ) -> Result<T, NpcError>
    where
        F: FnOnce(&mut GlobalNpc, &mut NpcContext<'_>) -> Result<T, NpcError>,
    {
        let locations = global_locations(&self.globals);
        let npc = self
            .globals
            .get_mut(code)
            .ok_or_else(|| NpcError::UnknownNpc(code.to_string()))?;
        let mut ctx = context!(self, protocol, world, &locations);
        f(npc, &mut ctx)
    }

    pub fn remove_global(
        &mut self,
        protocol: &mut dyn ProtocolAdapter,
        world: &dyn WorldView,
        code: &str,
    ) -> Result<(), NpcError> {
        let mut npc = self
            .globals
            .remove(code)
            .ok_or_else(|| NpcError::UnknownNpc(code.to_string()))?;
        let locations = HashMap::new();
        let mut ctx = context!(self, protocol, world, &locations);
        npc.destroy(&mut ctx);
        for session in self.sessions.values_mut() {
            session.parked_globals.remove(code);
        }
        self.last_interact
            .retain(|(key, _), _| *key != NpcKey::Global(code.to_string()));
        Ok(())
    }

    // =========================================================================
    // Host events
    // =========================================================================

    pub fn on_viewer_join(&mut self, protocol: &mut dyn ProtocolAdapter, world: &dyn WorldView, viewer: ViewerId) {
        let Some(state) = world.viewer(viewer) else {
            warn!("Join of unknown viewer {}", viewer);
            return;
        };
        info!("Viewer {} ({}) joined in '{}'", viewer, state.name, state.location.world);
        let mut session = ViewerSession::new(state.name.clone(), state.location.world.clone());
        session.last_block = Some(state.location.block());
        self.sessions.insert(viewer, session);

        let locations = global_locations(&self.globals);
        let mut ctx = context!(self, protocol, world, &locations);
        for npc in self.globals.values_mut() {
            npc.on_viewer_join(&mut ctx, &state);
        }
    }

    /// Drop everything the viewer had; nothing is sent to a gone client
    pub fn on_viewer_quit(&mut self, viewer: ViewerId) {
        if let Some(session) = self.sessions.remove(&viewer) {
            info!("Viewer {} ({}) left with {} npcs", viewer, session.name, session.npcs.len());
        }
        for npc in self.globals.values_mut() {
            npc.forget_viewer(viewer);
        }
        self.last_interact.retain(|(_, v), _| *v != viewer);
        self.deferred.retain(|i| i.viewer != viewer);
    }

    /// Park what was shown in `from`, re-show what was parked in `to`
    pub fn on_world_change(
        &mut self,
        protocol: &mut dyn ProtocolAdapter,
        world: &dyn WorldView,
        viewer: ViewerId,
        from: &str,
        to: &str,
    ) {
        let Some(session) = self.sessions.get_mut(&viewer) else {
            return;
        };
        session.world = to.to_string();
        session.last_block = world.viewer(viewer).map(|v| v.location.block());
        debug!("Viewer {} moved from '{}' to '{}'", viewer, from, to);

        let locations = session.locations();
        let mut ctx = context!(self, protocol, world, &locations);

        for (code, npc) in session.npcs.iter_mut() {
            if npc.location().world == from && npc.can_see() {
                npc.park(&mut ctx);
                session.parked.insert(code.clone());
            }
        }
        for (code, npc) in self.globals.iter_mut() {
            let Some(personal) = npc.personal_mut(viewer) else {
                continue;
            };
            if personal.location().world == from && personal.can_see() {
                personal.park(&mut ctx);
                session.parked_globals.insert(code.clone());
            }
        }

        let returning: Vec<String> = session
            .parked
            .iter()
            .filter(|code| session.npcs.get(*code).map_or(false, |n| n.location().world == to))
            .cloned()
            .collect();
        for code in returning {
            session.parked.remove(&code);
            if let Some(npc) = session.npcs.get_mut(&code) {
                if let Err(e) = npc.show(&mut ctx) {
                    debug!("'{}' not re-shown to viewer {}: {}", code, viewer, e);
                }
            }
        }

        let returning: Vec<String> = session
            .parked_globals
            .iter()
            .filter(|code| self.globals.get(*code).map_or(false, |n| n.location().world == to))
            .cloned()
            .collect();
        for code in returning {
            session.parked_globals.remove(&code);
            if let Some(personal) = self.globals.get_mut(&code).and_then(|n| n.personal_mut(viewer)) {
                if let Err(e) = personal.show(&mut ctx) {
                    debug!("Global '{}' not re-shown to viewer {}: {}", code, viewer, e);
                }
            }
        }
    }

    /// Movement notification. Only acts in on-move mode and only when the
    /// viewer entered a new block.
    pub fn on_viewer_move(&mut self, protocol: &mut dyn ProtocolAdapter, world: &dyn WorldView, viewer: ViewerId) {
        if self.config.update_mode != UpdateMode::OnMove {
            return;
        }
        let Some(state) = world.viewer(viewer) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&viewer) else {
            return;
        };
        let block = state.location.block();
        if session.last_block == Some(block) {
            return;
        }
        session.last_block = Some(block);
        self.update_viewer(protocol, world, viewer);
    }

    /// `update()` every NPC of the viewer's current world for that viewer
    pub fn update_viewer(&mut self, protocol: &mut dyn ProtocolAdapter, world: &dyn WorldView, viewer: ViewerId) {
        let Some(session) = self.sessions.get_mut(&viewer) else {
            return;
        };
        let locations = session.locations();
        let mut ctx = context!(self, protocol, world, &locations);
        for npc in session.npcs.values_mut() {
            if npc.location().world == session.world {
                npc.update(&mut ctx);
            }
        }
        for npc in self.globals.values_mut() {
            if npc.location().world == session.world {
                npc.update_viewer(&mut ctx, viewer);
            }
        }
    }

    // =========================================================================
    // Skins
    // =========================================================================

    /// Resolve a skin by player name and apply it to `target` once known.
    /// An online viewer's own profile is used right away.
    pub fn request_skin(
        &mut self,
        protocol: &mut dyn ProtocolAdapter,
        world: &dyn WorldView,
        target: SkinTarget,
        name: &str,
    ) {
        if let Some(skin) = world.viewer_by_name(name).and_then(|v| v.skin) {
            debug!("Using live profile skin of '{}'", name);
            self.apply_skin(protocol, world, target, skin);
            return;
        }
        let queued = match self.skins.as_ref() {
            Some((fetcher, _)) => fetcher.fetch(name, target.clone()),
            None => {
                warn!("No skin fetcher configured, '{}' resolves to the fallback skin", name);
                false
            }
        };
        if !queued {
            self.apply_skin(protocol, world, target, Skin::fallback());
        }
    }

    fn apply_skin(&mut self, protocol: &mut dyn ProtocolAdapter, world: &dyn WorldView, target: SkinTarget, skin: Skin) {
        let result = match target {
            SkinTarget::Personal { viewer, code } => self.with_personal(protocol, world, viewer, &code, |npc, ctx| {
                npc.attributes_mut().set_skin(Some(skin));
                if npc.is_created() {
                    npc.force_update(ctx)?;
                }
                Ok(())
            }),
            SkinTarget::Global { code } => self.with_global(protocol, world, &code, |npc, ctx| {
                npc.attributes_mut().set_skin(Some(skin));
                if npc.is_created() {
                    npc.force_update(ctx)?;
                }
                Ok(())
            }),
            SkinTarget::Overlay { code, viewer } => self.with_global(protocol, world, &code, |npc, ctx| {
                npc.overlay_mut(viewer).set_skin(Some(skin));
                if npc.is_created() {
                    npc.force_update(ctx)?;
                }
                Ok(())
            }),
        };
        if let Err(e) = result {
            debug!("Fetched skin not applied: {}", e);
        }
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// One simulation step
    pub fn tick(&mut self, protocol: &mut dyn ProtocolAdapter, world: &dyn WorldView, now: Instant) {
        self.tick += 1;
        self.now = now;

        for interaction in std::mem::take(&mut self.deferred) {
            self.dispatch(protocol, interaction);
        }
        while let Ok(interaction) = self.interactions_rx.try_recv() {
            self.deferred.push(interaction);
        }

        let fetched: Vec<SkinFetched> = match self.skins.as_mut() {
            Some((_, results)) => results.poll(),
            None => Vec::new(),
        };
        for done in fetched {
            self.apply_skin(protocol, world, done.target, done.skin);
        }

        for session in self.sessions.values_mut() {
            let locations = session.locations();
            let mut ctx = context!(self, &mut *protocol, world, &locations);
            for npc in session.npcs.values_mut() {
                npc.tick(&mut ctx);
            }
        }

        let locations = global_locations(&self.globals);
        {
            let mut ctx = context!(self, &mut *protocol, world, &locations);
            for npc in self.globals.values_mut() {
                npc.tick(&mut ctx);
            }
        }

        if let UpdateMode::Interval { ticks } = self.config.update_mode {
            if self.tick % ticks.max(1) == 0 {
                let viewers: Vec<ViewerId> = self.sessions.keys().copied().collect();
                for viewer in viewers {
                    self.update_viewer(protocol, world, viewer);
                }
            }
        }
    }

    /// Resolve a click to an NPC, debounce it and run its actions
    fn dispatch(&mut self, protocol: &mut dyn ProtocolAdapter, interaction: Interaction) {
        let viewer = interaction.viewer;
        let Some(target) = self.resolve_click(viewer, interaction.entity_id) else {
            debug!("Click on unknown entity {} by viewer {}", interaction.entity_id, viewer);
            return;
        };

        let slot = (target.key, viewer);
        if let Some(last) = self.last_interact.get(&slot) {
            if interaction.received_at.saturating_duration_since(*last) < target.cooldown {
                debug!("Click on '{}' by viewer {} within cooldown", target.code, viewer);
                return;
            }
        }
        self.last_interact.insert(slot, interaction.received_at);

        let event = ClickEvent {
            code: target.code,
            viewer,
            viewer_name: target.viewer_name,
            click: interaction.click,
        };
        run_actions(&target.bindings, &event, protocol, self.hooks.as_ref());
        self.hooks.on_interact(&event.code, viewer, interaction.click);
    }

    /// The NPC of `viewer` whose body or hologram is `entity_id`
    fn resolve_click(&self, viewer: ViewerId, entity_id: EntityId) -> Option<ClickTarget> {
        let session = self.sessions.get(&viewer)?;
        if let Some(npc) = session.npcs.values().find(|n| n.owns_entity(entity_id)) {
            return Some(ClickTarget {
                key: NpcKey::Personal(viewer, npc.code().to_string()),
                code: npc.code().to_string(),
                viewer_name: session.name.clone(),
                cooldown: npc.resolved(&self.defaults).interact_cooldown,
                bindings: npc.click_actions().to_vec(),
            });
        }
        self.globals.values().find_map(|npc| {
            let personal = npc.personal(viewer)?;
            if !personal.owns_entity(entity_id) {
                return None;
            }
            Some(ClickTarget {
                key: NpcKey::Global(npc.code().to_string()),
                code: npc.code().to_string(),
                viewer_name: session.name.clone(),
                cooldown: npc.merged_for(viewer).resolve(&self.defaults).interact_cooldown,
                bindings: npc.click_actions().to_vec(),
            })
        })
    }
}

/// A resolved click, detached from the registry borrow
struct ClickTarget {
    key: NpcKey,
    code: String,
    viewer_name: String,
    cooldown: Duration,
    bindings: Vec<ClickBinding>,
}

fn global_locations(globals: &BTreeMap<String, GlobalNpc>) -> HashMap<String, Location> {
    globals
        .iter()
        .map(|(code, npc)| (code.clone(), npc.location().clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npc::{ClickAction, ClickFilter, ClickKind, Listeners};
    use crate::protocol::PacketQueue;
    use crate::world::{GridWorld, ViewerState};
    use persona_shared::ServerPacket;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Host {
        queue: PacketQueue,
        world: GridWorld,
    }

    impl Host {
        fn new() -> Self {
            let mut world = GridWorld::new();
            world.set_ground_level("world", 63);
            world.set_ground_level("nether", 63);
            Self { queue: PacketQueue::new(), world }
        }

        fn join(&mut self, manager: &mut NpcManager, id: u64, location: Location) -> ViewerId {
            let viewer = ViewerId(id);
            self.world.upsert_viewer(ViewerState {
                id: viewer,
                name: format!("viewer{}", id),
                location,
                skin: None,
            });
            self.queue.open(viewer);
            manager.on_viewer_join(&mut self.queue, &self.world, viewer);
            viewer
        }
    }

    fn facing_npc() -> Location {
        Location::new("world", 0.5, 64.0, 8.5).with_look(180.0, 0.0)
    }

    fn shown_personal(manager: &mut NpcManager, host: &mut Host, viewer: ViewerId, code: &str) -> EntityId {
        manager
            .create_personal(viewer, code, Location::new("world", 0.5, 64.0, 0.5))
            .unwrap();
        manager
            .with_personal(&mut host.queue, &host.world, viewer, code, |npc, ctx| {
                npc.create(ctx)?;
                npc.show(ctx)
            })
            .unwrap();
        manager.personal(viewer, code).and_then(|n| n.entity_id()).unwrap()
    }

    fn counting_hooks(manager: &mut NpcManager) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let seen = count.clone();
        let mut listeners = Listeners::new();
        listeners.on_click(move |_, _, _| seen.set(seen.get() + 1));
        manager.set_hooks(Box::new(listeners));
        count
    }

    #[test]
    fn test_duplicate_and_unknown_codes() {
        let mut manager = NpcManager::new(NpcConfig::default(), AttributeDefaults::default());
        let mut host = Host::new();
        let viewer = host.join(&mut manager, 1, facing_npc());

        manager.create_personal(viewer, "guide", Location::new("world", 0.5, 64.0, 0.5)).unwrap();
        assert!(matches!(
            manager.create_personal(viewer, "guide", Location::new("world", 0.5, 64.0, 0.5)),
            Err(NpcError::DuplicateCode(_))
        ));
        assert!(matches!(
            manager.remove_personal(&mut host.queue, &host.world, viewer, "nobody"),
            Err(NpcError::UnknownNpc(_))
        ));
        manager.create_global("board", Location::new("world", 0.5, 64.0, 0.5), Visibility::Everyone).unwrap();
        assert!(matches!(
            manager.create_global("board", Location::new("world", 0.5, 64.0, 0.5), Visibility::Everyone),
            Err(NpcError::DuplicateCode(_))
        ));
    }

    #[test]
    fn test_interaction_dispatch_is_deferred_one_tick() {
        let mut manager = NpcManager::new(NpcConfig::default(), AttributeDefaults::default());
        let count = counting_hooks(&mut manager);
        let mut host = Host::new();
        let viewer = host.join(&mut manager, 1, facing_npc());
        let entity_id = shown_personal(&mut manager, &mut host, viewer, "guide");

        let t0 = Instant::now();
        manager
            .interaction_sender()
            .send(Interaction { viewer, entity_id, click: ClickKind::Right, received_at: t0 })
            .unwrap();

        manager.tick(&mut host.queue, &host.world, t0);
        assert_eq!(count.get(), 0);
        manager.tick(&mut host.queue, &host.world, t0 + Duration::from_millis(50));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_interactions_within_cooldown_are_dropped() {
        let mut manager = NpcManager::new(NpcConfig::default(), AttributeDefaults::default());
        let count = counting_hooks(&mut manager);
        let mut host = Host::new();
        let viewer = host.join(&mut manager, 1, facing_npc());
        let entity_id = shown_personal(&mut manager, &mut host, viewer, "guide");
        manager
            .personal_mut(viewer, "guide")
            .unwrap()
            .attributes_mut()
            .set_interact_cooldown(Some(Duration::from_millis(200)));

        let t0 = Instant::now();
        let sender = manager.interaction_sender();
        for offset in [0, 100] {
            sender
                .send(Interaction {
                    viewer,
                    entity_id,
                    click: ClickKind::Right,
                    received_at: t0 + Duration::from_millis(offset),
                })
                .unwrap();
        }
        manager.tick(&mut host.queue, &host.world, t0);
        manager.tick(&mut host.queue, &host.world, t0 + Duration::from_millis(150));
        assert_eq!(count.get(), 1);

        sender
            .send(Interaction {
                viewer,
                entity_id,
                click: ClickKind::Right,
                received_at: t0 + Duration::from_millis(250),
            })
            .unwrap();
        manager.tick(&mut host.queue, &host.world, t0 + Duration::from_millis(250));
        manager.tick(&mut host.queue, &host.world, t0 + Duration::from_millis(300));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_click_actions_run_with_placeholders() {
        let mut manager = NpcManager::new(NpcConfig::default(), AttributeDefaults::default());
        let mut host = Host::new();
        let viewer = host.join(&mut manager, 1, facing_npc());
        let entity_id = shown_personal(&mut manager, &mut host, viewer, "guide");
        let npc = manager.personal_mut(viewer, "guide").unwrap();
        npc.add_click_action(ClickBinding::new(
            ClickFilter::Right,
            ClickAction::Message("Hello {player}, I am {npc}".to_string()),
        ));
        npc.add_click_action(ClickBinding::new(
            ClickFilter::Left,
            ClickAction::Message("ouch".to_string()),
        ));
        host.queue.drain(viewer);

        let t0 = Instant::now();
        manager
            .interaction_sender()
            .send(Interaction { viewer, entity_id, click: ClickKind::Right, received_at: t0 })
            .unwrap();
        manager.tick(&mut host.queue, &host.world, t0);
        manager.tick(&mut host.queue, &host.world, t0);

        let chats: Vec<String> = host
            .queue
            .drain(viewer)
            .into_iter()
            .filter_map(|p| match p {
                ServerPacket::Chat { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(chats, vec!["Hello viewer1, I am guide".to_string()]);
    }

    #[test]
    fn test_world_change_parks_and_restores() {
        let mut manager = NpcManager::new(NpcConfig::default(), AttributeDefaults::default());
        let mut host = Host::new();
        let viewer = host.join(&mut manager, 1, facing_npc());
        shown_personal(&mut manager, &mut host, viewer, "guide");
        host.queue.drain(viewer);

        host.world.move_viewer(viewer, Location::new("nether", 0.5, 64.0, 0.5));
        manager.on_world_change(&mut host.queue, &host.world, viewer, "world", "nether");
        let npc = manager.personal(viewer, "guide").unwrap();
        assert!(!npc.can_see());
        assert!(manager.session(viewer).unwrap().is_parked("guide"));
        assert!(host
            .queue
            .drain(viewer)
            .iter()
            .any(|p| matches!(p, ServerPacket::DestroyEntities { .. })));

        host.world.move_viewer(viewer, facing_npc());
        manager.on_world_change(&mut host.queue, &host.world, viewer, "nether", "world");
        assert!(manager.personal(viewer, "guide").unwrap().is_rendered());
        assert!(!manager.session(viewer).unwrap().is_parked("guide"));
    }

    #[test]
    fn test_move_updates_only_on_new_block() {
        let mut manager = NpcManager::new(NpcConfig::default(), AttributeDefaults::default());
        let mut host = Host::new();
        let viewer = host.join(&mut manager, 1, Location::new("world", 0.5, 64.0, 60.5).with_look(180.0, 0.0));
        manager.create_personal(viewer, "guide", Location::new("world", 0.5, 64.0, 0.5)).unwrap();
        manager
            .with_personal(&mut host.queue, &host.world, viewer, "guide", |npc, ctx| {
                npc.create(ctx)?;
                npc.show(ctx)
            })
            .unwrap();
        assert!(manager.personal(viewer, "guide").unwrap().is_hidden_to_player());

        host.world.move_viewer(viewer, Location::new("world", 0.5, 64.0, 20.5).with_look(180.0, 0.0));
        manager.on_viewer_move(&mut host.queue, &host.world, viewer);
        assert!(manager.personal(viewer, "guide").unwrap().is_rendered());
    }

    #[test]
    fn test_global_follows_joins_and_quits() {
        let mut manager = NpcManager::new(NpcConfig::default(), AttributeDefaults::default());
        let mut host = Host::new();
        manager.create_global("board", Location::new("world", 0.5, 64.0, 0.5), Visibility::Everyone).unwrap();
        manager
            .with_global(&mut host.queue, &host.world, "board", |npc, ctx| npc.create(ctx))
            .unwrap();

        let viewer = host.join(&mut manager, 7, facing_npc());
        assert!(manager.global("board").unwrap().personal(viewer).unwrap().is_rendered());

        manager.on_viewer_quit(viewer);
        assert!(!manager.global("board").unwrap().has_viewer(viewer));
        assert!(manager.session(viewer).is_none());
    }

    #[test]
    fn test_live_viewer_skin_applies_immediately() {
        let mut manager = NpcManager::new(NpcConfig::default(), AttributeDefaults::default());
        let mut host = Host::new();
        let viewer = host.join(&mut manager, 1, facing_npc());
        host.world.upsert_viewer(ViewerState {
            id: ViewerId(2),
            name: "Notch".to_string(),
            location: Location::new("world", 30.5, 64.0, 30.5),
            skin: Some(Skin::from_player("Notch", "tex", "sig")),
        });
        shown_personal(&mut manager, &mut host, viewer, "guide");

        manager.request_skin(
            &mut host.queue,
            &host.world,
            SkinTarget::Personal { viewer, code: "guide".to_string() },
            "notch",
        );
        let defaults = manager.defaults().clone();
        let skin = manager.personal(viewer, "guide").unwrap().resolved(&defaults).skin;
        assert_eq!(skin.texture.as_deref(), Some("tex"));
    }

    #[test]
    fn test_fetched_skins_are_applied_on_tick() {
        let mut manager = NpcManager::new(NpcConfig::default(), AttributeDefaults::default());
        let mut host = Host::new();
        let viewer = host.join(&mut manager, 1, facing_npc());
        shown_personal(&mut manager, &mut host, viewer, "guide");

        let (command_tx, mut command_rx) = mpsc::channel(4);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        manager.set_skin_fetcher(SkinFetcher::from_sender(command_tx), SkinResults::from_receiver(done_rx));

        let target = SkinTarget::Personal { viewer, code: "guide".to_string() };
        manager.request_skin(&mut host.queue, &host.world, target.clone(), "Jeb");
        assert!(command_rx.try_recv().is_ok());

        done_tx
            .send(SkinFetched { target, name: "Jeb".to_string(), skin: Skin::new("jeb", "sig") })
            .unwrap();
        host.queue.drain(viewer);
        manager.tick(&mut host.queue, &host.world, Instant::now());

        assert!(host.queue.drain(viewer).iter().any(|p| matches!(
            p,
            ServerPacket::PlayerInfoAdd { texture: Some(t), .. } if t == "jeb"
        )));
    }
}
