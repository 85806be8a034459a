//! One logical NPC shown to many viewers.
//!
//! A global NPC owns one [`PersonalNpc`] per eligible viewer. Each call
//! resolves the viewer's overlay over the shared attributes, pushes the
//! result into that viewer's NPC and then delegates to it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info};
use persona_shared::{Pose, RELATIVE_MOVE_LIMIT};

use super::attributes::{AttributeDefaults, Attributes, FollowLook};
use super::interact::ClickBinding;
use super::personal::PersonalNpc;
use super::{nearest_entity, nearest_player, Npc, NpcAction, NpcContext, NpcEvent};
use crate::error::NpcError;
use crate::math::{Location, Vec3};
use crate::movement::{self, Motion, Movable};
use crate::world::{ViewerId, ViewerState};

/// Who may see a global NPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Every online viewer the predicate accepts, added automatically
    #[default]
    Everyone,
    /// Only viewers added with `add_selected`
    SelectedPlayers,
}

/// Extra admission check on top of [`Visibility`]
pub type ViewerPredicate = Box<dyn Fn(&ViewerState) -> bool>;

/// Nearest-target scans shared by all viewers of one global NPC
#[derive(Debug, Clone, Default)]
struct NearestCache {
    player: Option<(Instant, Option<Vec3>)>,
    entity: Option<(Instant, Option<Vec3>)>,
}

impl NearestCache {
    fn lookup(&mut self, ctx: &NpcContext<'_>, from: &Location, mode: FollowLook) -> Option<Vec3> {
        let slot = match mode {
            FollowLook::NearestPlayer => &mut self.player,
            FollowLook::NearestEntity => &mut self.entity,
            FollowLook::None | FollowLook::Player => return None,
        };
        if let Some((at, target)) = slot {
            if fresh(*at, ctx.now, ctx.config.nearest_cache_ttl()) {
                return *target;
            }
        }
        let radius = ctx.config.nearest_scan_radius;
        let target = if mode == FollowLook::NearestPlayer {
            nearest_player(ctx.world, from, radius)
        } else {
            nearest_entity(ctx.world, from, radius)
        };
        *slot = Some((ctx.now, target));
        target
    }

    fn clear(&mut self) {
        self.player = None;
        self.entity = None;
    }
}

fn fresh(at: Instant, now: Instant, ttl: Duration) -> bool {
    now.checked_duration_since(at).map_or(true, |age| age < ttl)
}

pub struct GlobalNpc {
    code: String,
    location: Location,
    /// Shared record every overlay falls back to
    attributes: Attributes,
    overlays: HashMap<ViewerId, Attributes>,
    personals: HashMap<ViewerId, PersonalNpc>,
    visibility: Visibility,
    selected: HashSet<ViewerId>,
    predicate: Option<ViewerPredicate>,
    auto_create: bool,
    auto_show: bool,
    created: bool,
    motion: Motion,
    nearest: NearestCache,
    click_actions: Vec<ClickBinding>,
}

impl fmt::Debug for GlobalNpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalNpc")
            .field("code", &self.code)
            .field("location", &self.location)
            .field("visibility", &self.visibility)
            .field("viewers", &self.personals.len())
            .field("created", &self.created)
            .finish()
    }
}

impl GlobalNpc {
    pub fn new(code: impl Into<String>, location: Location, visibility: Visibility) -> Self {
        Self {
            code: code.into(),
            location,
            attributes: Attributes::new(),
            overlays: HashMap::new(),
            personals: HashMap::new(),
            visibility,
            selected: HashSet::new(),
            predicate: None,
            auto_create: true,
            auto_show: true,
            created: false,
            motion: Motion::default(),
            nearest: NearestCache::default(),
            click_actions: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Shared record, applied on the next `update()` or `force_update()`
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Per-viewer overlay, only the values it sets win over the shared record
    pub fn overlay_mut(&mut self, viewer: ViewerId) -> &mut Attributes {
        self.overlays.entry(viewer).or_default()
    }

    pub fn overlay(&self, viewer: ViewerId) -> Option<&Attributes> {
        self.overlays.get(&viewer)
    }

    pub fn reset_overlay(&mut self, viewer: ViewerId) {
        if let Some(overlay) = self.overlays.get_mut(&viewer) {
            *overlay = Attributes::new();
        }
    }

    /// Overlay resolved over the shared record
    pub fn merged_for(&self, viewer: ViewerId) -> Attributes {
        merged(&self.attributes, self.overlays.get(&viewer))
    }

    pub fn set_tab_list_name(&mut self, template: Option<&str>) -> Result<(), NpcError> {
        let code = self.code.clone();
        self.attributes.set_tab_list_name(template, &code)
    }

    pub fn set_predicate<F>(&mut self, predicate: Option<F>)
    where
        F: Fn(&ViewerState) -> bool + 'static,
    {
        self.predicate = predicate.map(|f| Box::new(f) as ViewerPredicate);
    }

    pub fn set_auto_create(&mut self, auto_create: bool) {
        self.auto_create = auto_create;
    }

    pub fn set_auto_show(&mut self, auto_show: bool) {
        self.auto_show = auto_show;
    }

    pub fn personal(&self, viewer: ViewerId) -> Option<&PersonalNpc> {
        self.personals.get(&viewer)
    }

    pub fn personal_mut(&mut self, viewer: ViewerId) -> Option<&mut PersonalNpc> {
        self.personals.get_mut(&viewer)
    }

    pub fn viewers(&self) -> impl Iterator<Item = ViewerId> + '_ {
        self.personals.keys().copied()
    }

    pub fn has_viewer(&self, viewer: ViewerId) -> bool {
        self.personals.contains_key(&viewer)
    }

    pub fn is_selected(&self, viewer: ViewerId) -> bool {
        self.selected.contains(&viewer)
    }

    pub fn click_actions(&self) -> &[ClickBinding] {
        &self.click_actions
    }

    pub fn add_click_action(&mut self, binding: ClickBinding) {
        self.click_actions.push(binding);
    }

    pub fn clear_click_actions(&mut self) {
        self.click_actions.clear();
    }

    // =========================================================================
    // Viewers
    // =========================================================================

    /// Visibility policy plus predicate
    pub fn allows(&self, viewer: &ViewerState) -> bool {
        if self.visibility == Visibility::SelectedPlayers && !self.selected.contains(&viewer.id) {
            return false;
        }
        self.predicate.as_ref().map_or(true, |accept| accept(viewer))
    }

    /// Start showing this NPC to `viewer`. `force` skips the policy.
    pub fn add_viewer(&mut self, ctx: &mut NpcContext<'_>, viewer: ViewerId, force: bool) -> Result<(), NpcError> {
        if self.personals.contains_key(&viewer) {
            return Ok(());
        }
        let state = ctx.world.viewer(viewer).ok_or(NpcError::ViewerOffline(viewer))?;
        if !force && !self.allows(&state) {
            return Err(NpcError::ViewerNotAllowed(viewer, self.code.clone()));
        }

        let mut personal = PersonalNpc::new(self.code.clone(), viewer, self.location.clone());
        self.overlays.entry(viewer).or_default();
        personal.set_attributes(self.merged_for(viewer));

        if self.auto_create && self.created {
            personal.create(ctx)?;
            if self.auto_show {
                if let Err(e) = personal.show(ctx) {
                    debug!("'{}' not shown to viewer {}: {}", self.code, viewer, e);
                }
            }
        }
        debug!("Added viewer {} to global '{}'", viewer, self.code);
        self.personals.insert(viewer, personal);
        Ok(())
    }

    /// Stop showing this NPC to `viewer` and drop the overlay
    pub fn remove_viewer(&mut self, ctx: &mut NpcContext<'_>, viewer: ViewerId) {
        if let Some(mut personal) = self.personals.remove(&viewer) {
            personal.destroy(ctx);
            debug!("Removed viewer {} from global '{}'", viewer, self.code);
        }
        self.overlays.remove(&viewer);
    }

    /// Drop a viewer that is gone without sending anything
    pub fn forget_viewer(&mut self, viewer: ViewerId) {
        self.personals.remove(&viewer);
        self.overlays.remove(&viewer);
    }

    pub fn add_selected(&mut self, ctx: &mut NpcContext<'_>, viewer: ViewerId) -> Result<(), NpcError> {
        self.selected.insert(viewer);
        self.add_viewer(ctx, viewer, false)
    }

    pub fn remove_selected(&mut self, ctx: &mut NpcContext<'_>, viewer: ViewerId) {
        self.selected.remove(&viewer);
        self.remove_viewer(ctx, viewer);
    }

    /// Offer a viewer that just came online
    pub fn on_viewer_join(&mut self, ctx: &mut NpcContext<'_>, viewer: &ViewerState) {
        if !self.created || self.personals.contains_key(&viewer.id) || !self.allows(viewer) {
            return;
        }
        if self.visibility == Visibility::Everyone || self.selected.contains(&viewer.id) {
            if let Err(e) = self.add_viewer(ctx, viewer.id, false) {
                debug!("Viewer {} not added to '{}': {}", viewer.id, self.code, e);
            }
        }
    }

    /// Run `op` for every active viewer with the merged attributes pushed first
    fn fan_out<F>(&mut self, ctx: &mut NpcContext<'_>, mut op: F)
    where
        F: FnMut(&mut PersonalNpc, &mut NpcContext<'_>) -> Result<(), NpcError>,
    {
        for (viewer, personal) in self.personals.iter_mut() {
            if !personal.is_created() || !ctx.world.is_online(*viewer) {
                continue;
            }
            personal.set_attributes(merged(&self.attributes, self.overlays.get(viewer)));
            if let Err(e) = op(personal, ctx) {
                debug!("'{}' skipped for viewer {}: {}", self.code, viewer, e);
            }
        }
    }

    /// Admit online viewers and create their NPCs, recording every one that
    /// was created so a failure can be undone
    fn create_personals(&mut self, ctx: &mut NpcContext<'_>, spawned: &mut Vec<ViewerId>) -> Result<(), NpcError> {
        if self.visibility == Visibility::Everyone {
            for viewer in ctx.world.viewers() {
                if !self.personals.contains_key(&viewer.id) && self.allows(&viewer) {
                    self.add_viewer(ctx, viewer.id, false)?;
                }
            }
        }
        if !self.auto_create {
            return Ok(());
        }
        let code = &self.code;
        for (viewer, personal) in self.personals.iter_mut() {
            if personal.is_created() {
                continue;
            }
            personal.set_attributes(merged(&self.attributes, self.overlays.get(viewer)));
            personal.create(ctx)?;
            spawned.push(*viewer);
            if self.auto_show {
                if let Err(e) = personal.show(ctx) {
                    debug!("'{}' not shown to viewer {}: {}", code, viewer, e);
                }
            }
        }
        Ok(())
    }

    /// `update()` for a single viewer, used when only that viewer moved
    pub fn update_viewer(&mut self, ctx: &mut NpcContext<'_>, viewer: ViewerId) {
        let Self { personals, overlays, attributes, nearest, location, .. } = self;
        let Some(personal) = personals.get_mut(&viewer) else {
            return;
        };
        if !personal.is_created() || !ctx.world.is_online(viewer) {
            return;
        }
        personal.set_attributes(merged(attributes, overlays.get(&viewer)));
        let mode = Movable::follow_look(&*personal, ctx.defaults);
        let target = nearest.lookup(ctx, location, mode);
        personal.update_looking_at(ctx, target);
    }

    /// Timers of every viewer's NPC, then this NPC's own movement
    pub fn tick(&mut self, ctx: &mut NpcContext<'_>) {
        for personal in self.personals.values_mut() {
            personal.tick(ctx);
        }
        movement::tick(self, ctx);
    }
}

fn merged(shared: &Attributes, overlay: Option<&Attributes>) -> Attributes {
    match overlay {
        Some(overlay) => overlay.merged_over(shared),
        None => shared.clone(),
    }
}

impl Npc for GlobalNpc {
    fn code(&self) -> &str {
        &self.code
    }

    fn location(&self) -> &Location {
        &self.location
    }

    fn create(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError> {
        if self.created {
            return Err(NpcError::AlreadyCreated(self.code.clone()));
        }
        let known: HashSet<ViewerId> = self.personals.keys().copied().collect();
        let had_overlay: HashSet<ViewerId> = self.overlays.keys().copied().collect();
        let mut spawned = Vec::new();

        if let Err(e) = self.create_personals(ctx, &mut spawned) {
            for viewer in spawned {
                if let Some(personal) = self.personals.get_mut(&viewer) {
                    personal.destroy(ctx);
                }
            }
            self.personals.retain(|viewer, _| known.contains(viewer));
            self.overlays.retain(|viewer, _| had_overlay.contains(viewer));
            return Err(e);
        }

        self.created = true;
        info!("Created global '{}' for {} viewers", self.code, self.personals.len());
        Ok(())
    }

    fn show(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError> {
        if !self.created {
            return Err(NpcError::NotCreated(self.code.clone()));
        }
        self.fan_out(ctx, |npc, ctx| npc.show(ctx));
        Ok(())
    }

    fn hide(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError> {
        if !self.created {
            return Err(NpcError::NotCreated(self.code.clone()));
        }
        self.fan_out(ctx, |npc, ctx| npc.hide(ctx));
        Ok(())
    }

    fn update(&mut self, ctx: &mut NpcContext<'_>) {
        let viewers: Vec<ViewerId> = self.personals.keys().copied().collect();
        for viewer in viewers {
            self.update_viewer(ctx, viewer);
        }
    }

    fn force_update(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError> {
        if !self.created {
            return Err(NpcError::NotCreated(self.code.clone()));
        }
        self.nearest.clear();
        self.fan_out(ctx, |npc, ctx| npc.force_update(ctx));
        Ok(())
    }

    fn teleport(&mut self, ctx: &mut NpcContext<'_>, to: Location) -> Result<(), NpcError> {
        if !self.created {
            return Err(NpcError::NotCreated(self.code.clone()));
        }
        ctx.check(NpcEvent {
            code: &self.code,
            viewer: None,
            action: NpcAction::Teleport { to: &to },
        })?;
        self.location = to.clone();
        self.nearest.clear();
        self.fan_out(ctx, |npc, ctx| {
            npc.relocate(ctx, to.clone());
            Ok(())
        });
        Ok(())
    }

    fn move_by(&mut self, ctx: &mut NpcContext<'_>, delta: Vec3) -> Result<(), NpcError> {
        if !self.created {
            return Err(NpcError::NotCreated(self.code.clone()));
        }
        if [delta.x, delta.y, delta.z].iter().any(|d| !(d.abs() < RELATIVE_MOVE_LIMIT)) {
            return Err(NpcError::MoveTooLarge { dx: delta.x, dy: delta.y, dz: delta.z });
        }
        ctx.check(NpcEvent {
            code: &self.code,
            viewer: None,
            action: NpcAction::Move { delta },
        })?;
        self.location = self.location.offset(delta);
        self.fan_out(ctx, |npc, ctx| {
            npc.shift(ctx, delta);
            Ok(())
        });
        Ok(())
    }

    fn look_at(&mut self, ctx: &mut NpcContext<'_>, yaw: f32, pitch: f32) {
        self.location.yaw = yaw;
        self.location.pitch = pitch;
        self.fan_out(ctx, |npc, ctx| {
            npc.look_at(ctx, yaw, pitch);
            Ok(())
        });
    }

    fn destroy(&mut self, ctx: &mut NpcContext<'_>) {
        self.motion.behaviour = Default::default();
        movement::cancel_move(self, ctx);
        for personal in self.personals.values_mut() {
            personal.destroy(ctx);
        }
        self.created = false;
        self.nearest.clear();
        info!("Destroyed global '{}'", self.code);
    }
}

impl Movable for GlobalNpc {
    fn viewer(&self) -> Option<ViewerId> {
        None
    }

    fn is_created(&self) -> bool {
        self.created
    }

    fn pose(&self, defaults: &AttributeDefaults) -> Pose {
        self.attributes.pose().unwrap_or(defaults.pose)
    }

    fn set_pose(&mut self, ctx: &mut NpcContext<'_>, pose: Pose) {
        self.attributes.set_pose(Some(pose));
        self.update(ctx);
    }

    fn follow_look(&self, defaults: &AttributeDefaults) -> FollowLook {
        self.attributes.follow_look().unwrap_or(defaults.follow_look)
    }

    fn set_follow_look(&mut self, mode: FollowLook) {
        self.attributes.set_follow_look(Some(mode));
    }

    fn move_speed(&self, defaults: &AttributeDefaults) -> f64 {
        self.attributes.move_speed().unwrap_or(defaults.move_speed)
    }

    fn sync_location(&mut self, ctx: &mut NpcContext<'_>) {
        self.fan_out(ctx, |npc, ctx| {
            npc.sync_location(ctx);
            Ok(())
        });
    }

    fn motion(&self) -> &Motion {
        &self.motion
    }

    fn motion_mut(&mut self) -> &mut Motion {
        &mut self.motion
    }
}
