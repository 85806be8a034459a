//! One fake player for one viewer.
//!
//! A personal NPC walks `uncreated -> created -> {shown, hidden}`. It is
//! rendered to its viewer exactly when it is created, the viewer wants to
//! see it (`can_see`) and it is not culled (`hidden_to_player`).

use std::collections::BTreeMap;

use log::{debug, info, trace};
use persona_shared::{
    encode_relative_delta, entity_flags, CollisionRule, EntityId, EquipmentSlot, GlowColor, ItemStack,
    MetadataEntry, NameTagVisibility, Pose, ProfileId, ServerPacket, TeamAction, RELATIVE_MOVE_LIMIT,
};

use super::attributes::{AttributeDefaults, Attributes, FollowLook, ResolvedAttributes, MAX_TAB_LIST_NAME};
use super::hologram::Hologram;
use super::interact::ClickBinding;
use super::{nearest_entity, nearest_player, Npc, NpcAction, NpcContext, NpcEvent};
use crate::error::NpcError;
use crate::math::{angles_toward, Location, Vec3};
use crate::movement::{self, Motion, Movable};
use crate::protocol::send_or_log;
use crate::world::{ViewerId, ViewerState, WorldView, EYE_HEIGHT};

/// Wire identity of a created NPC, stable until destroy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeIdentity {
    pub entity_id: EntityId,
    pub profile_id: ProfileId,
    /// Profile name, the expanded tab list name
    pub name: String,
    pub team: String,
}

/// What the viewer's client was last told, to keep updates incremental
#[derive(Debug, Clone, Default)]
struct SentState {
    metadata: Vec<MetadataEntry>,
    equipment: Vec<(EquipmentSlot, ItemStack)>,
    team: Option<(GlowColor, CollisionRule)>,
    look: Option<(f32, f32)>,
}

#[derive(Debug, Clone)]
pub struct PersonalNpc {
    code: String,
    viewer: ViewerId,
    location: Location,
    attributes: Attributes,
    identity: Option<FakeIdentity>,
    hologram: Option<Hologram>,
    can_see: bool,
    hidden_to_player: bool,
    hidden_text: bool,
    /// Profile currently in the viewer's player list
    listed: bool,
    /// Range culling is suspended until this tick
    range_override_until: Option<u64>,
    /// Tick at which the profile leaves the player list
    tab_list_removal_at: Option<u64>,
    sent: SentState,
    motion: Motion,
    click_actions: Vec<ClickBinding>,
    /// Lines changed in place while the text still comes from the defaults,
    /// 0-based
    line_overrides: BTreeMap<usize, String>,
}

impl PersonalNpc {
    pub fn new(code: impl Into<String>, viewer: ViewerId, location: Location) -> Self {
        Self {
            code: code.into(),
            viewer,
            location,
            attributes: Attributes::new(),
            identity: None,
            hologram: None,
            can_see: false,
            hidden_to_player: true,
            hidden_text: false,
            listed: false,
            range_override_until: None,
            tab_list_removal_at: None,
            sent: SentState::default(),
            motion: Motion::default(),
            click_actions: Vec::new(),
            line_overrides: BTreeMap::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn viewer(&self) -> ViewerId {
        self.viewer
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Changes apply on the next `update()` or `force_update()`
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Replace the whole record, used by global NPCs to push merged overlays
    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }

    pub fn resolved(&self, defaults: &AttributeDefaults) -> ResolvedAttributes {
        let mut attrs = self.attributes.resolve(defaults);
        if self.attributes.text().is_none() {
            for (&index, line) in &self.line_overrides {
                if let Some(slot) = attrs.text.get_mut(index) {
                    *slot = line.clone();
                }
            }
        }
        attrs
    }

    /// `{id}` is replaced with this NPC's code
    pub fn set_tab_list_name(&mut self, template: Option<&str>) -> Result<(), NpcError> {
        let code = self.code.clone();
        self.attributes.set_tab_list_name(template, &code)
    }

    pub fn identity(&self) -> Option<&FakeIdentity> {
        self.identity.as_ref()
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        self.identity.as_ref().map(|i| i.entity_id)
    }

    /// Body or one of the hologram markers
    pub fn owns_entity(&self, entity_id: EntityId) -> bool {
        self.entity_id() == Some(entity_id)
            || self.hologram.as_ref().map(|h| h.contains_entity(entity_id)).unwrap_or(false)
    }

    pub fn is_created(&self) -> bool {
        self.identity.is_some()
    }

    pub fn can_see(&self) -> bool {
        self.can_see
    }

    pub fn is_hidden_to_player(&self) -> bool {
        self.hidden_to_player
    }

    /// Currently spawned on the viewer's client
    pub fn is_rendered(&self) -> bool {
        self.is_created() && self.can_see && !self.hidden_to_player
    }

    pub fn is_hidden_text(&self) -> bool {
        self.hidden_text
    }

    pub fn is_listed(&self) -> bool {
        self.listed
    }

    pub fn hologram(&self) -> Option<&Hologram> {
        self.hologram.as_ref()
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

    fn eye(&self) -> Vec3 {
        self.location.position() + Vec3::new(0.0, EYE_HEIGHT, 0.0)
    }

    fn grace_active(&self, tick: u64) -> bool {
        self.range_override_until.map_or(false, |until| tick < until)
    }

    /// Expanded tab list name, which the client caps at 16 characters
    fn profile_name(&self, attrs: &ResolvedAttributes) -> Result<String, NpcError> {
        let name = attrs.tab_list_name_for(&self.code);
        let len = name.chars().count();
        if len > MAX_TAB_LIST_NAME {
            return Err(NpcError::TabListNameTooLong { name, len });
        }
        Ok(name)
    }

    fn on_ground(&self, world: &dyn WorldView) -> bool {
        let (x, _, z) = self.location.block();
        let below = (self.location.y - 0.05).floor() as i32;
        world.block_at(&self.location.world, x, below, z).is_solid()
    }

    // =========================================================================
    // Visibility tests
    // =========================================================================

    /// Strictly closer than the hide distance, same world only
    pub fn in_range(&self, viewer: &ViewerState, hide_distance: f64) -> bool {
        self.location
            .distance_to(&viewer.location)
            .map_or(false, |d| d < hide_distance)
    }

    /// Inside the viewer's view cone
    pub fn in_view(&self, viewer: &ViewerState, fov_cos: f64) -> bool {
        if !self.location.same_world(&viewer.location) {
            return false;
        }
        let to_npc = self.location.position() - viewer.eye();
        if to_npc.length_squared() < 1e-12 {
            return true;
        }
        to_npc.normalized().dot(viewer.look_direction()) >= fov_cos
    }

    // =========================================================================
    // Wire sequences
    // =========================================================================

    fn metadata_entries(attrs: &ResolvedAttributes) -> Vec<MetadataEntry> {
        let mut flags = 0u8;
        if attrs.on_fire {
            flags |= entity_flags::ON_FIRE;
        }
        match attrs.pose {
            Pose::Crouching => flags |= entity_flags::CROUCHING,
            Pose::Swimming => flags |= entity_flags::SWIMMING,
            _ => {}
        }
        if attrs.glowing {
            flags |= entity_flags::GLOWING;
        }
        vec![
            MetadataEntry::Flags(flags),
            MetadataEntry::Pose(attrs.pose),
            MetadataEntry::SkinParts(attrs.skin.parts),
        ]
    }

    fn equipment_entries(attrs: &ResolvedAttributes) -> Vec<(EquipmentSlot, ItemStack)> {
        EquipmentSlot::ALL.iter().map(|slot| (*slot, attrs.item(*slot))).collect()
    }

    fn team_settings(attrs: &ResolvedAttributes) -> (GlowColor, CollisionRule) {
        let collision = if attrs.collidable { CollisionRule::Always } else { CollisionRule::Never };
        (attrs.glow_color, collision)
    }

    fn spawn(&mut self, ctx: &mut NpcContext<'_>, attrs: &ResolvedAttributes) {
        let Some(identity) = self.identity.clone() else {
            return;
        };
        let viewer = self.viewer;
        let (color, collision) = Self::team_settings(attrs);
        let metadata = Self::metadata_entries(attrs);
        let equipment = Self::equipment_entries(attrs);
        let position = self.location.position().to_array();

        send_or_log(
            ctx.protocol,
            viewer,
            ServerPacket::Team {
                name: identity.team.clone(),
                action: TeamAction::Create {
                    color,
                    name_tag_visibility: NameTagVisibility::Never,
                    collision,
                    members: vec![identity.name.clone()],
                },
            },
        );
        send_or_log(
            ctx.protocol,
            viewer,
            ServerPacket::PlayerInfoAdd {
                profile_id: identity.profile_id,
                name: identity.name.clone(),
                texture: attrs.skin.texture.clone(),
                signature: attrs.skin.signature.clone(),
                listed: true,
            },
        );
        send_or_log(
            ctx.protocol,
            viewer,
            ServerPacket::SpawnPlayer {
                entity_id: identity.entity_id,
                profile_id: identity.profile_id,
                position,
                yaw: self.location.yaw,
                pitch: self.location.pitch,
            },
        );
        send_or_log(
            ctx.protocol,
            viewer,
            ServerPacket::HeadRotation { entity_id: identity.entity_id, head_yaw: self.location.yaw },
        );
        send_or_log(
            ctx.protocol,
            viewer,
            ServerPacket::Metadata { entity_id: identity.entity_id, entries: metadata.clone() },
        );
        send_or_log(
            ctx.protocol,
            viewer,
            ServerPacket::Equipment { entity_id: identity.entity_id, slots: equipment.clone() },
        );

        self.sent = SentState {
            metadata,
            equipment,
            team: Some((color, collision)),
            look: Some((self.location.yaw, self.location.pitch)),
        };
        self.hidden_to_player = false;
        self.listed = true;
        self.tab_list_removal_at = if attrs.show_on_tab_list {
            None
        } else {
            Some(ctx.tick + ctx.config.tab_list_hide_ticks)
        };

        if !self.hidden_text {
            if let Some(hologram) = self.hologram.as_mut() {
                hologram.show(ctx.protocol);
            }
        }
        trace!("Spawned '{}' for viewer {}", self.code, viewer);
    }

    fn despawn(&mut self, ctx: &mut NpcContext<'_>) {
        let Some(identity) = self.identity.as_ref() else {
            return;
        };
        let viewer = self.viewer;
        send_or_log(
            ctx.protocol,
            viewer,
            ServerPacket::DestroyEntities { entity_ids: vec![identity.entity_id] },
        );
        if self.listed {
            send_or_log(
                ctx.protocol,
                viewer,
                ServerPacket::PlayerInfoRemove { profile_ids: vec![identity.profile_id] },
            );
        }
        send_or_log(
            ctx.protocol,
            viewer,
            ServerPacket::Team { name: identity.team.clone(), action: TeamAction::Remove },
        );
        if let Some(hologram) = self.hologram.as_mut() {
            hologram.hide(ctx.protocol);
        }
        self.hidden_to_player = true;
        self.listed = false;
        self.tab_list_removal_at = None;
        self.sent = SentState::default();
        trace!("Despawned '{}' for viewer {}", self.code, viewer);
    }

    fn send_look(&mut self, ctx: &mut NpcContext<'_>) {
        let Some(entity_id) = self.entity_id() else {
            return;
        };
        let look = (self.location.yaw, self.location.pitch);
        if self.sent.look == Some(look) {
            return;
        }
        let on_ground = self.on_ground(ctx.world);
        send_or_log(
            ctx.protocol,
            self.viewer,
            ServerPacket::Rotation { entity_id, yaw: look.0, pitch: look.1, on_ground },
        );
        send_or_log(ctx.protocol, self.viewer, ServerPacket::HeadRotation { entity_id, head_yaw: look.0 });
        self.sent.look = Some(look);
    }

    /// Incremental packets for whatever changed since the last send
    fn refresh(&mut self, ctx: &mut NpcContext<'_>, attrs: &ResolvedAttributes, viewer: &ViewerState, target: Option<Vec3>) {
        let Some(identity) = self.identity.clone() else {
            return;
        };

        let metadata = Self::metadata_entries(attrs);
        if metadata != self.sent.metadata {
            send_or_log(
                ctx.protocol,
                self.viewer,
                ServerPacket::Metadata { entity_id: identity.entity_id, entries: metadata.clone() },
            );
            self.sent.metadata = metadata;
        }

        let look_at = match attrs.follow_look {
            FollowLook::None => None,
            FollowLook::Player => Some(viewer.eye()),
            FollowLook::NearestPlayer | FollowLook::NearestEntity => target,
        };
        if let Some(point) = look_at {
            let (yaw, pitch) = angles_toward(self.eye(), point);
            self.location.yaw = yaw;
            self.location.pitch = pitch;
        }
        self.send_look(ctx);

        let equipment = Self::equipment_entries(attrs);
        let changed: Vec<(EquipmentSlot, ItemStack)> = equipment
            .iter()
            .filter(|entry| !self.sent.equipment.contains(entry))
            .cloned()
            .collect();
        if !changed.is_empty() {
            send_or_log(
                ctx.protocol,
                self.viewer,
                ServerPacket::Equipment { entity_id: identity.entity_id, slots: changed },
            );
            self.sent.equipment = equipment;
        }

        let team = Self::team_settings(attrs);
        if self.sent.team != Some(team) {
            send_or_log(
                ctx.protocol,
                self.viewer,
                ServerPacket::Team {
                    name: identity.team.clone(),
                    action: TeamAction::Update {
                        color: team.0,
                        name_tag_visibility: NameTagVisibility::Never,
                        collision: team.1,
                    },
                },
            );
            self.sent.team = Some(team);
        }

        if let Some(hologram) = self.hologram.as_mut() {
            hologram.update(&attrs.text, ctx.protocol);
        }
    }

    // =========================================================================
    // Lifecycle extras
    // =========================================================================

    /// Update with a precomputed nearest-target, used by global NPCs that
    /// cache the scan
    pub fn update_looking_at(&mut self, ctx: &mut NpcContext<'_>, nearest: Option<Vec3>) {
        if !self.is_created() || !self.can_see {
            return;
        }
        let Some(viewer) = ctx.world.viewer(self.viewer) else {
            return;
        };
        let attrs = self.resolved(ctx.defaults);
        // the grace window widens the distance only, never across worlds
        let in_range = viewer.location.same_world(&self.location)
            && (self.grace_active(ctx.tick) || self.in_range(&viewer, attrs.hide_distance));

        if !self.hidden_to_player {
            if !in_range {
                debug!("Culling '{}' for viewer {}", self.code, self.viewer);
                self.despawn(ctx);
                return;
            }
            self.refresh(ctx, &attrs, &viewer, nearest);
            return;
        }

        if in_range && self.in_view(&viewer, ctx.config.fov_cos()) {
            debug!("'{}' back in view of viewer {}", self.code, self.viewer);
            self.spawn(ctx, &attrs);
        }
    }

    /// Show or hide the floating text independently of the body
    pub fn set_hidden_text(&mut self, ctx: &mut NpcContext<'_>, hidden: bool) {
        self.hidden_text = hidden;
        if !self.is_rendered() {
            return;
        }
        if let Some(hologram) = self.hologram.as_mut() {
            if hidden {
                hologram.hide(ctx.protocol);
            } else {
                hologram.show(ctx.protocol);
            }
        }
    }

    /// Change one hologram line in place
    pub fn set_line(&mut self, ctx: &mut NpcContext<'_>, line: u32, text: impl Into<String>) -> Result<(), NpcError> {
        let Some(hologram) = self.hologram.as_mut() else {
            return Err(NpcError::NotCreated(self.code.clone()));
        };
        let text = text.into();
        hologram.set_line(line, text.clone(), ctx.protocol)?;

        let index = line as usize - 1;
        match self.attributes.text() {
            Some(explicit) => {
                let mut lines = explicit.to_vec();
                if let Some(slot) = lines.get_mut(index) {
                    *slot = text;
                    self.attributes.set_text(Some(lines));
                }
            }
            None => {
                self.line_overrides.insert(index, text);
            }
        }
        Ok(())
    }

    /// Teleport without asking the hooks, for callers that already did
    pub(crate) fn relocate(&mut self, ctx: &mut NpcContext<'_>, to: Location) {
        let was_rendered = self.is_rendered();
        if was_rendered {
            self.despawn(ctx);
        }
        self.location = to;
        let attrs = self.resolved(ctx.defaults);
        if let Some(hologram) = self.hologram.as_mut() {
            hologram.set_location(&self.location, &attrs, ctx.protocol);
        }
        if was_rendered {
            let in_range = ctx
                .world
                .viewer(self.viewer)
                .map_or(false, |v| self.in_range(&v, attrs.hide_distance));
            if in_range {
                self.spawn(ctx, &attrs);
            }
        }
    }

    /// Bounded relative move without asking the hooks
    pub(crate) fn shift(&mut self, ctx: &mut NpcContext<'_>, delta: Vec3) {
        self.location = self.location.offset(delta);
        let rendered = self.is_rendered();
        if rendered {
            if let Some(entity_id) = self.entity_id() {
                let encoded = [
                    encode_relative_delta(delta.x),
                    encode_relative_delta(delta.y),
                    encode_relative_delta(delta.z),
                ];
                let on_ground = self.on_ground(ctx.world);
                match encoded {
                    [Some(x), Some(y), Some(z)] => send_or_log(
                        ctx.protocol,
                        self.viewer,
                        ServerPacket::RelativeMove { entity_id, delta: [x, y, z], on_ground },
                    ),
                    _ => send_or_log(
                        ctx.protocol,
                        self.viewer,
                        ServerPacket::Teleport {
                            entity_id,
                            position: self.location.position().to_array(),
                            yaw: self.location.yaw,
                            pitch: self.location.pitch,
                            on_ground,
                        },
                    ),
                }
            }
        }
        if let Some(hologram) = self.hologram.as_mut() {
            hologram.move_by(delta, ctx.protocol);
        }
    }

    /// Absolute position for the body and its text, no respawn
    pub fn sync_location(&mut self, ctx: &mut NpcContext<'_>) {
        if !self.is_rendered() {
            return;
        }
        let Some(entity_id) = self.entity_id() else {
            return;
        };
        let on_ground = self.on_ground(ctx.world);
        send_or_log(
            ctx.protocol,
            self.viewer,
            ServerPacket::Teleport {
                entity_id,
                position: self.location.position().to_array(),
                yaw: self.location.yaw,
                pitch: self.location.pitch,
                on_ground,
            },
        );
        let attrs = self.resolved(ctx.defaults);
        if let Some(hologram) = self.hologram.as_mut() {
            hologram.set_location(&self.location, &attrs, ctx.protocol);
        }
    }

    /// Per-tick timers and movement
    pub fn tick(&mut self, ctx: &mut NpcContext<'_>) {
        if let Some(until) = self.range_override_until {
            if ctx.tick >= until {
                self.range_override_until = None;
            }
        }
        if let Some(at) = self.tab_list_removal_at {
            if ctx.tick >= at {
                self.tab_list_removal_at = None;
                if let Some(identity) = self.identity.as_ref().filter(|_| self.listed) {
                    send_or_log(
                        ctx.protocol,
                        self.viewer,
                        ServerPacket::PlayerInfoRemove { profile_ids: vec![identity.profile_id] },
                    );
                }
                self.listed = false;
            }
        }
        movement::tick(self, ctx);
    }

    /// Drop all state without telling the viewer, for sessions that are gone
    pub fn discard(&mut self) {
        self.motion = Motion::default();
        self.identity = None;
        self.hologram = None;
        self.can_see = false;
        self.hidden_to_player = true;
        self.listed = false;
        self.range_override_until = None;
        self.tab_list_removal_at = None;
    }

    /// Hide without asking the hooks, used when the viewer leaves the
    /// NPC's world
    pub fn park(&mut self, ctx: &mut NpcContext<'_>) {
        if self.is_rendered() {
            self.despawn(ctx);
        }
        self.can_see = false;
    }
}

impl Npc for PersonalNpc {
    fn code(&self) -> &str {
        &self.code
    }

    fn location(&self) -> &Location {
        &self.location
    }

    fn create(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError> {
        if self.identity.is_some() {
            return Err(NpcError::AlreadyCreated(self.code.clone()));
        }
        let attrs = self.resolved(ctx.defaults);
        let name = self.profile_name(&attrs)?;
        let profile_id = ProfileId::from_random_bits(rand::random());
        let identity = FakeIdentity {
            entity_id: ctx.protocol.allocate_entity_id(),
            profile_id,
            name,
            team: format!("npc{}", profile_id.short()),
        };
        self.hologram = Some(Hologram::new(self.viewer, &self.location, &attrs, ctx.protocol));
        info!(
            "Created '{}' for viewer {} as entity {}",
            self.code, self.viewer, identity.entity_id
        );
        self.identity = Some(identity);
        self.hidden_to_player = true;
        Ok(())
    }

    fn show(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError> {
        if !self.is_created() {
            return Err(NpcError::NotCreated(self.code.clone()));
        }
        if self.is_rendered() {
            return Ok(());
        }
        let viewer = ctx.world.viewer(self.viewer).ok_or(NpcError::ViewerOffline(self.viewer))?;
        ctx.check(NpcEvent {
            code: &self.code,
            viewer: Some(self.viewer),
            action: NpcAction::Show,
        })?;

        self.can_see = true;
        let attrs = self.resolved(ctx.defaults);
        if !self.in_range(&viewer, attrs.hide_distance) || !self.in_view(&viewer, ctx.config.fov_cos()) {
            debug!("'{}' wanted by viewer {} but out of range or view", self.code, self.viewer);
            self.hidden_to_player = true;
            return Ok(());
        }
        self.spawn(ctx, &attrs);
        self.range_override_until = Some(ctx.tick + ctx.config.show_grace_ticks);
        Ok(())
    }

    fn hide(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError> {
        if !self.is_created() {
            return Err(NpcError::NotCreated(self.code.clone()));
        }
        if !self.can_see {
            return Ok(());
        }
        ctx.check(NpcEvent {
            code: &self.code,
            viewer: Some(self.viewer),
            action: NpcAction::Hide,
        })?;
        if !self.hidden_to_player {
            self.despawn(ctx);
        }
        self.can_see = false;
        self.hidden_to_player = true;
        self.range_override_until = None;
        Ok(())
    }

    fn update(&mut self, ctx: &mut NpcContext<'_>) {
        let mode = self.attributes.follow_look().unwrap_or(ctx.defaults.follow_look);
        let radius = ctx.config.nearest_scan_radius;
        let nearest = match mode {
            FollowLook::NearestPlayer => nearest_player(ctx.world, &self.location, radius),
            FollowLook::NearestEntity => nearest_entity(ctx.world, &self.location, radius),
            _ => None,
        };
        self.update_looking_at(ctx, nearest);
    }

    fn force_update(&mut self, ctx: &mut NpcContext<'_>) -> Result<(), NpcError> {
        if !self.is_created() {
            return Err(NpcError::NotCreated(self.code.clone()));
        }
        let attrs = self.resolved(ctx.defaults);
        let name = self.profile_name(&attrs)?;
        let was_rendered = self.is_rendered();
        if was_rendered {
            self.despawn(ctx);
        }
        if let Some(identity) = self.identity.as_mut() {
            identity.name = name;
        }
        if let Some(hologram) = self.hologram.as_mut() {
            hologram.force_update(&self.location, &attrs, ctx.protocol);
        }
        if was_rendered {
            self.spawn(ctx, &attrs);
        }
        self.update(ctx);
        Ok(())
    }

    fn teleport(&mut self, ctx: &mut NpcContext<'_>, to: Location) -> Result<(), NpcError> {
        if !self.is_created() {
            return Err(NpcError::NotCreated(self.code.clone()));
        }
        ctx.check(NpcEvent {
            code: &self.code,
            viewer: Some(self.viewer),
            action: NpcAction::Teleport { to: &to },
        })?;
        self.relocate(ctx, to);
        Ok(())
    }

    fn move_by(&mut self, ctx: &mut NpcContext<'_>, delta: Vec3) -> Result<(), NpcError> {
        if !self.is_created() {
            return Err(NpcError::NotCreated(self.code.clone()));
        }
        if [delta.x, delta.y, delta.z]
            .iter()
            .any(|d| !(d.abs() < RELATIVE_MOVE_LIMIT))
        {
            return Err(NpcError::MoveTooLarge { dx: delta.x, dy: delta.y, dz: delta.z });
        }
        ctx.check(NpcEvent {
            code: &self.code,
            viewer: Some(self.viewer),
            action: NpcAction::Move { delta },
        })?;
        self.shift(ctx, delta);
        Ok(())
    }

    fn look_at(&mut self, ctx: &mut NpcContext<'_>, yaw: f32, pitch: f32) {
        self.location.yaw = yaw;
        self.location.pitch = pitch;
        if self.is_rendered() {
            self.send_look(ctx);
        }
    }

    fn destroy(&mut self, ctx: &mut NpcContext<'_>) {
        if !self.is_created() {
            return;
        }
        self.motion.behaviour = Default::default();
        movement::cancel_move(self, ctx);
        if self.is_rendered() {
            self.despawn(ctx);
        }
        info!("Destroyed '{}' for viewer {}", self.code, self.viewer);
        self.discard();
    }
}

impl Movable for PersonalNpc {
    fn viewer(&self) -> Option<ViewerId> {
        Some(self.viewer)
    }

    fn is_created(&self) -> bool {
        self.identity.is_some()
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
        PersonalNpc::sync_location(self, ctx)
    }

    fn motion(&self) -> &Motion {
        &self.motion
    }

    fn motion_mut(&mut self) -> &mut Motion {
        &mut self.motion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npc::attributes::MoveSpeed;
    use crate::npc::hooks::{Decision, Listeners};
    use crate::npc::skin::Skin;
    use crate::npc::testing::{destroyed, spawned_player, Harness};

    /// Viewer looking north (-Z) from `z`, towards an NPC at the origin
    fn viewer_at(h: &mut Harness, z: f64) -> ViewerId {
        h.add_viewer(1, "Alex", Location::new("world", 0.5, 64.0, z).with_look(180.0, 0.0))
    }

    fn npc_at_origin(h: &mut Harness, viewer: ViewerId) -> PersonalNpc {
        let mut npc = PersonalNpc::new("guide", viewer, Location::new("world", 0.5, 64.0, 0.5));
        npc.attributes_mut().set_text(Some(vec!["Guide".to_string()]));
        npc.create(&mut h.ctx()).unwrap();
        npc
    }

    #[test]
    fn test_spawn_sequence_order() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();

        let sent = h.sent(v);
        assert!(matches!(sent[0], ServerPacket::Team { action: TeamAction::Create { .. }, .. }));
        assert!(matches!(sent[1], ServerPacket::PlayerInfoAdd { listed: true, .. }));
        assert!(matches!(sent[2], ServerPacket::SpawnPlayer { .. }));
        assert!(matches!(sent[3], ServerPacket::HeadRotation { .. }));
        assert!(matches!(sent[4], ServerPacket::Metadata { .. }));
        assert!(matches!(sent[5], ServerPacket::Equipment { .. }));
        assert!(matches!(sent[6], ServerPacket::SpawnMarker { .. }));
        assert!(npc.is_rendered());
    }

    #[test]
    fn test_out_of_range_show_then_approach() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 60.5);
        let mut npc = npc_at_origin(&mut h, v);
        npc.attributes_mut().set_hide_distance(Some(50.0)).unwrap();

        npc.show(&mut h.ctx()).unwrap();
        assert!(npc.can_see());
        assert!(npc.is_hidden_to_player());
        assert!(!spawned_player(&h.sent(v)));

        h.move_viewer(v, Location::new("world", 0.5, 64.0, 40.5).with_look(180.0, 0.0));
        npc.update(&mut h.ctx());
        assert!(!npc.is_hidden_to_player());
        assert!(spawned_player(&h.sent(v)));
    }

    #[test]
    fn test_range_without_view_does_not_respawn() {
        let mut h = Harness::new();
        // looking south, away from the npc
        let v = h.add_viewer(1, "Alex", Location::new("world", 0.5, 64.0, 60.5).with_look(0.0, 0.0));
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();
        h.sent(v);

        h.move_viewer(v, Location::new("world", 0.5, 64.0, 20.5).with_look(0.0, 0.0));
        npc.update(&mut h.ctx());
        assert!(npc.is_hidden_to_player());
        assert!(h.sent(v).is_empty());

        // turning around brings it back
        h.move_viewer(v, Location::new("world", 0.5, 64.0, 20.5).with_look(180.0, 0.0));
        npc.update(&mut h.ctx());
        assert!(npc.is_rendered());
    }

    #[test]
    fn test_hide_and_show_are_idempotent() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);

        npc.show(&mut h.ctx()).unwrap();
        h.sent(v);
        npc.show(&mut h.ctx()).unwrap();
        assert!(h.sent(v).is_empty());

        npc.hide(&mut h.ctx()).unwrap();
        assert!(destroyed(&h.sent(v)));
        npc.hide(&mut h.ctx()).unwrap();
        assert!(h.sent(v).is_empty());
        assert!(!npc.can_see());
    }

    #[test]
    fn test_vetoed_show_changes_nothing() {
        let mut h = Harness::new();
        let mut listeners = Listeners::new();
        listeners.on_before(|e| match e.action {
            NpcAction::Show => Decision::Deny,
            _ => Decision::Allow,
        });
        h.hooks = Box::new(listeners);
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);

        assert!(matches!(npc.show(&mut h.ctx()), Err(NpcError::Vetoed("show"))));
        assert!(!npc.can_see());
        assert!(h.sent(v).is_empty());
    }

    #[test]
    fn test_grace_window_then_culling() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();

        // viewer teleports away immediately
        h.move_viewer(v, Location::new("world", 0.5, 64.0, 200.5).with_look(180.0, 0.0));
        npc.update(&mut h.ctx());
        assert!(npc.is_rendered());

        h.advance(h.config.show_grace_ticks);
        npc.tick(&mut h.ctx());
        npc.update(&mut h.ctx());
        assert!(npc.is_hidden_to_player());
        assert!(npc.can_see());
    }

    #[test]
    fn test_tab_list_removed_once_after_delay() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();
        h.sent(v);

        let removals = |packets: &[ServerPacket]| {
            packets
                .iter()
                .filter(|p| matches!(p, ServerPacket::PlayerInfoRemove { .. }))
                .count()
        };

        h.advance(h.config.tab_list_hide_ticks - 1);
        npc.tick(&mut h.ctx());
        assert_eq!(removals(&h.sent(v)), 0);

        h.advance(1);
        npc.tick(&mut h.ctx());
        assert_eq!(removals(&h.sent(v)), 1);
        assert!(!npc.is_listed());

        h.advance(100);
        npc.tick(&mut h.ctx());
        assert_eq!(removals(&h.sent(v)), 0);
    }

    #[test]
    fn test_large_move_is_rejected() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();
        h.sent(v);

        let before = npc.location().clone();
        let result = npc.move_by(&mut h.ctx(), Vec3::new(8.0, 0.0, 0.0));
        assert!(matches!(result, Err(NpcError::MoveTooLarge { .. })));
        assert_eq!(npc.location(), &before);
        assert!(h.sent(v).is_empty());

        npc.move_by(&mut h.ctx(), Vec3::new(7.5, 0.0, -7.5)).unwrap();
        let sent = h.sent(v);
        assert!(matches!(
            sent[0],
            ServerPacket::RelativeMove { delta: [30720, 0, -30720], .. }
        ));
    }

    #[test]
    fn test_force_update_keeps_identity_and_applies_skin() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();
        let identity = npc.identity().cloned().unwrap();
        h.sent(v);

        npc.attributes_mut().set_skin(Some(Skin::new("texture", "signature")));
        npc.force_update(&mut h.ctx()).unwrap();

        assert_eq!(npc.identity().map(|i| i.entity_id), Some(identity.entity_id));
        let sent = h.sent(v);
        assert!(destroyed(&sent));
        assert!(sent.iter().any(|p| matches!(
            p,
            ServerPacket::PlayerInfoAdd { texture: Some(t), .. } if t == "texture"
        )));
    }

    #[test]
    fn test_update_sends_only_changes() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();
        h.sent(v);

        npc.update(&mut h.ctx());
        assert!(h.sent(v).is_empty());

        npc.attributes_mut().set_glowing(Some(true));
        npc.attributes_mut().set_pose(Some(Pose::Crouching));
        npc.update(&mut h.ctx());
        let sent = h.sent(v);
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            ServerPacket::Metadata { entries, .. } => assert_eq!(
                entries[0],
                MetadataEntry::Flags(entity_flags::CROUCHING | entity_flags::GLOWING)
            ),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_teleport_respawns_in_range() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();
        let entity_id = npc.entity_id();
        h.sent(v);

        npc.teleport(&mut h.ctx(), Location::new("world", 3.5, 64.0, 3.5)).unwrap();
        let sent = h.sent(v);
        assert!(destroyed(&sent));
        assert!(spawned_player(&sent));
        assert!(!sent.iter().any(|p| matches!(p, ServerPacket::RelativeMove { .. })));
        assert_eq!(npc.entity_id(), entity_id);
        assert_eq!(npc.location().x, 3.5);
    }

    #[test]
    fn test_grace_window_does_not_cross_worlds() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();
        h.sent(v);

        h.move_viewer(v, Location::new("nether", 0.5, 64.0, 10.0).with_look(180.0, 0.0));
        npc.update(&mut h.ctx());

        assert!(!npc.is_rendered());
        assert!(npc.can_see());
        assert!(destroyed(&h.sent(v)));
    }

    #[test]
    fn test_vetoed_teleport_and_move_change_nothing() {
        let mut h = Harness::new();
        let mut listeners = Listeners::new();
        listeners.on_before(|e| match e.action {
            NpcAction::Teleport { .. } | NpcAction::Move { .. } => Decision::Deny,
            _ => Decision::Allow,
        });
        h.hooks = Box::new(listeners);
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();
        h.sent(v);
        let before = npc.location().clone();

        let result = npc.teleport(&mut h.ctx(), Location::new("world", 3.5, 64.0, 3.5));
        assert!(matches!(result, Err(NpcError::Vetoed(_))));
        let result = npc.move_by(&mut h.ctx(), Vec3::new(1.0, 0.0, 0.0));
        assert!(matches!(result, Err(NpcError::Vetoed(_))));

        assert_eq!(npc.location(), &before);
        assert!(npc.is_rendered());
        assert!(h.sent(v).is_empty());
    }

    #[test]
    fn test_create_rejects_long_default_tab_list_name() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        // "[NPC] shopkeeper1" is 17 characters
        let mut npc = PersonalNpc::new("shopkeeper1", v, Location::new("world", 0.5, 64.0, 0.5));

        let result = npc.create(&mut h.ctx());
        assert!(matches!(result, Err(NpcError::TabListNameTooLong { len: 17, .. })));
        assert!(!npc.is_created());
        assert!(npc.hologram().is_none());

        npc.set_tab_list_name(Some("{id}")).unwrap();
        npc.create(&mut h.ctx()).unwrap();
        assert_eq!(npc.identity().map(|i| i.name.as_str()), Some("shopkeeper1"));
    }

    #[test]
    fn test_set_line_keeps_default_text_unpinned() {
        let mut h = Harness::new();
        h.defaults.text = vec!["Hello".to_string(), "World".to_string()];
        let v = viewer_at(&mut h, 10.0);
        let mut npc = PersonalNpc::new("guide", v, Location::new("world", 0.5, 64.0, 0.5));
        npc.create(&mut h.ctx()).unwrap();
        npc.show(&mut h.ctx()).unwrap();

        npc.set_line(&mut h.ctx(), 2, "Friend").unwrap();
        assert!(npc.attributes().text().is_none());
        assert_eq!(npc.resolved(&h.defaults).text, vec!["Hello".to_string(), "Friend".to_string()]);

        h.defaults.text = vec!["Howdy".to_string(), "World".to_string()];
        assert_eq!(npc.resolved(&h.defaults).text, vec!["Howdy".to_string(), "Friend".to_string()]);

        npc.attributes_mut().set_text(Some(vec!["Mine".to_string()]));
        npc.set_line(&mut h.ctx(), 1, "Still mine").unwrap();
        assert_eq!(npc.attributes().text(), Some(&["Still mine".to_string()][..]));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.attributes_mut().set_move_speed(Some(MoveSpeed::Sprint)).unwrap();
        npc.show(&mut h.ctx()).unwrap();
        movement::move_to(
            &mut npc,
            &mut h.ctx(),
            Location::new("world", 5.5, 64.0, 0.5),
            Default::default(),
        )
        .unwrap();

        npc.destroy(&mut h.ctx());
        assert!(!npc.is_created());
        assert!(npc.motion().task.is_none());
        assert!(npc.hologram().is_none());
        assert!(matches!(npc.show(&mut h.ctx()), Err(NpcError::NotCreated(_))));
    }

    #[test]
    fn test_hidden_text_toggles_markers_only() {
        let mut h = Harness::new();
        let v = viewer_at(&mut h, 10.0);
        let mut npc = npc_at_origin(&mut h, v);
        npc.show(&mut h.ctx()).unwrap();
        h.sent(v);

        npc.set_hidden_text(&mut h.ctx(), true);
        let sent = h.sent(v);
        assert_eq!(sent.len(), 1);
        assert!(npc.is_rendered());
        assert!(!npc.hologram().unwrap().is_shown());
    }
}
