//! NPC attributes and the default template.
//!
//! [`Attributes`] is sparse: every field is optional and an unset field
//! resolves to the template in [`AttributeDefaults`]. The same type is used
//! for per-viewer overlays of a global NPC, merged with
//! [`Attributes::merged_over`].

use std::collections::BTreeMap;
use std::time::Duration;
use persona_shared::{EquipmentSlot, GlowColor, ItemStack, Pose, SkinParts};

use super::skin::Skin;
use crate::error::NpcError;
use crate::math::Vec3;

// =============================================================================
// Constants
// =============================================================================

pub const DEFAULT_HIDE_DISTANCE: f64 = 50.0;

pub const DEFAULT_LINE_SPACING: f64 = 0.27;
pub const MIN_LINE_SPACING: f64 = 0.1;
pub const MAX_LINE_SPACING: f64 = 1.0;

pub const DEFAULT_TEXT_ALIGNMENT: Vec3 = Vec3 { x: 0.0, y: 1.8, z: 0.0 };
/// Horizontal alignment is clamped to +-2 blocks
pub const MAX_ALIGNMENT_HORIZONTAL: f64 = 2.0;
pub const MIN_ALIGNMENT_Y: f64 = -2.0;
pub const MAX_ALIGNMENT_Y: f64 = 5.0;

pub const DEFAULT_INTERACT_COOLDOWN: Duration = Duration::from_millis(1000);

pub const DEFAULT_TAB_LIST_NAME: &str = "[NPC] {id}";
/// Longest name the player list accepts
pub const MAX_TAB_LIST_NAME: usize = 16;

// =============================================================================
// Value types
// =============================================================================

/// Where the NPC keeps looking between explicit look calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FollowLook {
    #[default]
    None,
    /// The viewer the instance belongs to
    Player,
    NearestPlayer,
    NearestEntity,
}

/// Fake text opacity by stacking several markers with the same name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextOpacity {
    #[default]
    Lowest,
    Low,
    Medium,
    Hard,
    Harder,
    Full,
}

impl TextOpacity {
    /// Number of stacked markers per line
    pub fn times(&self) -> usize {
        match self {
            Self::Lowest => 1,
            Self::Low => 2,
            Self::Medium => 3,
            Self::Hard => 4,
            Self::Harder => 6,
            Self::Full => 10,
        }
    }
}

/// Movement speed presets, in blocks per tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveSpeed {
    Slow,
    Normal,
    Sprint,
    Custom(f64),
}

impl MoveSpeed {
    pub fn value(&self) -> f64 {
        match self {
            Self::Slow => 0.05,
            Self::Normal => 0.1,
            Self::Sprint => 0.2,
            Self::Custom(v) => *v,
        }
    }
}

impl Default for MoveSpeed {
    fn default() -> Self {
        Self::Normal
    }
}

// =============================================================================
// Resolved attributes
// =============================================================================

/// A fully populated attribute set
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAttributes {
    pub skin: Skin,
    pub text: Vec<String>,
    pub equipment: BTreeMap<EquipmentSlot, ItemStack>,
    pub collidable: bool,
    pub hide_distance: f64,
    pub glowing: bool,
    pub glow_color: GlowColor,
    pub follow_look: FollowLook,
    /// Template, `{id}` not yet substituted
    pub tab_list_name: String,
    pub show_on_tab_list: bool,
    pub pose: Pose,
    pub line_spacing: f64,
    pub text_alignment: Vec3,
    pub interact_cooldown: Duration,
    pub text_opacity: TextOpacity,
    pub line_opacity: BTreeMap<u32, TextOpacity>,
    pub on_fire: bool,
    pub move_speed: f64,
}

/// The template unset attributes resolve to
pub type AttributeDefaults = ResolvedAttributes;

impl Default for ResolvedAttributes {
    fn default() -> Self {
        Self {
            skin: Skin::fallback(),
            text: Vec::new(),
            equipment: BTreeMap::new(),
            collidable: false,
            hide_distance: DEFAULT_HIDE_DISTANCE,
            glowing: false,
            glow_color: GlowColor::White,
            follow_look: FollowLook::None,
            tab_list_name: DEFAULT_TAB_LIST_NAME.to_string(),
            show_on_tab_list: false,
            pose: Pose::Standing,
            line_spacing: DEFAULT_LINE_SPACING,
            text_alignment: DEFAULT_TEXT_ALIGNMENT,
            interact_cooldown: DEFAULT_INTERACT_COOLDOWN,
            text_opacity: TextOpacity::Lowest,
            line_opacity: BTreeMap::new(),
            on_fire: false,
            move_speed: MoveSpeed::Normal.value(),
        }
    }
}

impl ResolvedAttributes {
    /// Opacity of a 1-based line, falling back to the text-wide value
    pub fn opacity_of(&self, line: u32) -> TextOpacity {
        self.line_opacity.get(&line).copied().unwrap_or(self.text_opacity)
    }

    /// Item in a slot, air if empty
    pub fn item(&self, slot: EquipmentSlot) -> ItemStack {
        self.equipment.get(&slot).cloned().unwrap_or_else(ItemStack::air)
    }

    /// Tab list name with `{id}` replaced by the NPC code
    pub fn tab_list_name_for(&self, code: &str) -> String {
        expand_tab_list_name(&self.tab_list_name, code)
    }
}

pub fn expand_tab_list_name(template: &str, code: &str) -> String {
    template.replace("{id}", code)
}

// =============================================================================
// Sparse attributes
// =============================================================================

/// Attribute record of one NPC, or an overlay for one viewer.
///
/// `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    skin: Option<Skin>,
    skin_parts: Option<SkinParts>,
    text: Option<Vec<String>>,
    equipment: BTreeMap<EquipmentSlot, ItemStack>,
    collidable: Option<bool>,
    hide_distance: Option<f64>,
    glowing: Option<bool>,
    glow_color: Option<GlowColor>,
    follow_look: Option<FollowLook>,
    tab_list_name: Option<String>,
    show_on_tab_list: Option<bool>,
    pose: Option<Pose>,
    line_spacing: Option<f64>,
    text_alignment: Option<Vec3>,
    interact_cooldown: Option<Duration>,
    text_opacity: Option<TextOpacity>,
    line_opacity: BTreeMap<u32, TextOpacity>,
    on_fire: Option<bool>,
    move_speed: Option<f64>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill every unset field from the template
    pub fn resolve(&self, defaults: &AttributeDefaults) -> ResolvedAttributes {
        let mut skin = self.skin.clone().unwrap_or_else(|| defaults.skin.clone());
        if let Some(parts) = self.skin_parts {
            skin.parts = parts;
        }

        let mut equipment = defaults.equipment.clone();
        equipment.extend(self.equipment.iter().map(|(s, i)| (*s, i.clone())));

        let mut line_opacity = defaults.line_opacity.clone();
        line_opacity.extend(self.line_opacity.iter().map(|(l, o)| (*l, *o)));

        ResolvedAttributes {
            skin,
            text: self.text.clone().unwrap_or_else(|| defaults.text.clone()),
            equipment,
            collidable: self.collidable.unwrap_or(defaults.collidable),
            hide_distance: self.hide_distance.unwrap_or(defaults.hide_distance),
            glowing: self.glowing.unwrap_or(defaults.glowing),
            glow_color: self.glow_color.unwrap_or(defaults.glow_color),
            follow_look: self.follow_look.unwrap_or(defaults.follow_look),
            tab_list_name: self
                .tab_list_name
                .clone()
                .unwrap_or_else(|| defaults.tab_list_name.clone()),
            show_on_tab_list: self.show_on_tab_list.unwrap_or(defaults.show_on_tab_list),
            pose: self.pose.unwrap_or(defaults.pose),
            line_spacing: self.line_spacing.unwrap_or(defaults.line_spacing),
            text_alignment: self.text_alignment.unwrap_or(defaults.text_alignment),
            interact_cooldown: self.interact_cooldown.unwrap_or(defaults.interact_cooldown),
            text_opacity: self.text_opacity.unwrap_or(defaults.text_opacity),
            line_opacity,
            on_fire: self.on_fire.unwrap_or(defaults.on_fire),
            move_speed: self.move_speed.unwrap_or(defaults.move_speed),
        }
    }

    /// Overlay rule: a field set here wins, otherwise the shared value is used
    pub fn merged_over(&self, shared: &Attributes) -> Attributes {
        let mut equipment = shared.equipment.clone();
        equipment.extend(self.equipment.iter().map(|(s, i)| (*s, i.clone())));

        let mut line_opacity = shared.line_opacity.clone();
        line_opacity.extend(self.line_opacity.iter().map(|(l, o)| (*l, *o)));

        Attributes {
            skin: self.skin.clone().or_else(|| shared.skin.clone()),
            skin_parts: self.skin_parts.or(shared.skin_parts),
            text: self.text.clone().or_else(|| shared.text.clone()),
            equipment,
            collidable: self.collidable.or(shared.collidable),
            hide_distance: self.hide_distance.or(shared.hide_distance),
            glowing: self.glowing.or(shared.glowing),
            glow_color: self.glow_color.or(shared.glow_color),
            follow_look: self.follow_look.or(shared.follow_look),
            tab_list_name: self.tab_list_name.clone().or_else(|| shared.tab_list_name.clone()),
            show_on_tab_list: self.show_on_tab_list.or(shared.show_on_tab_list),
            pose: self.pose.or(shared.pose),
            line_spacing: self.line_spacing.or(shared.line_spacing),
            text_alignment: self.text_alignment.or(shared.text_alignment),
            interact_cooldown: self.interact_cooldown.or(shared.interact_cooldown),
            text_opacity: self.text_opacity.or(shared.text_opacity),
            line_opacity,
            on_fire: self.on_fire.or(shared.on_fire),
            move_speed: self.move_speed.or(shared.move_speed),
        }
    }

    // =========================================================================
    // Setters
    // =========================================================================

    pub fn set_skin(&mut self, skin: Option<Skin>) {
        self.skin = skin;
    }

    pub fn set_skin_parts(&mut self, parts: Option<SkinParts>) {
        self.skin_parts = parts;
    }

    pub fn set_text(&mut self, text: Option<Vec<String>>) {
        self.text = text;
    }

    /// `None` (or air) clears the slot
    pub fn set_item(&mut self, slot: EquipmentSlot, item: Option<ItemStack>) {
        match item {
            Some(item) if !item.is_air() => {
                self.equipment.insert(slot, item);
            }
            _ => {
                self.equipment.remove(&slot);
            }
        }
    }

    pub fn set_collidable(&mut self, collidable: Option<bool>) {
        self.collidable = collidable;
    }

    pub fn set_hide_distance(&mut self, distance: Option<f64>) -> Result<(), NpcError> {
        if let Some(d) = distance {
            if !(d > 0.0) || !d.is_finite() {
                return Err(NpcError::InvalidHideDistance(d));
            }
        }
        self.hide_distance = distance;
        Ok(())
    }

    pub fn set_glowing(&mut self, glowing: Option<bool>) {
        self.glowing = glowing;
    }

    pub fn set_glow_color(&mut self, color: Option<GlowColor>) {
        self.glow_color = color;
    }

    pub fn set_follow_look(&mut self, mode: Option<FollowLook>) {
        self.follow_look = mode;
    }

    /// Fails if the name is longer than 16 characters once `{id}` is
    /// replaced with `code`
    pub fn set_tab_list_name(&mut self, template: Option<&str>, code: &str) -> Result<(), NpcError> {
        if let Some(template) = template {
            let name = expand_tab_list_name(template, code);
            let len = name.chars().count();
            if len > MAX_TAB_LIST_NAME {
                return Err(NpcError::TabListNameTooLong { name, len });
            }
        }
        self.tab_list_name = template.map(str::to_string);
        Ok(())
    }

    pub fn set_show_on_tab_list(&mut self, show: Option<bool>) {
        self.show_on_tab_list = show;
    }

    pub fn set_pose(&mut self, pose: Option<Pose>) {
        self.pose = pose;
    }

    /// Clamped to [0.1, 1.0]
    pub fn set_line_spacing(&mut self, spacing: Option<f64>) {
        self.line_spacing = spacing
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(MIN_LINE_SPACING, MAX_LINE_SPACING));
    }

    /// Clamped per axis
    pub fn set_text_alignment(&mut self, alignment: Option<Vec3>) {
        self.text_alignment = alignment.map(|a| Vec3 {
            x: clamp_finite(a.x, -MAX_ALIGNMENT_HORIZONTAL, MAX_ALIGNMENT_HORIZONTAL),
            y: clamp_finite(a.y, MIN_ALIGNMENT_Y, MAX_ALIGNMENT_Y),
            z: clamp_finite(a.z, -MAX_ALIGNMENT_HORIZONTAL, MAX_ALIGNMENT_HORIZONTAL),
        });
    }

    pub fn set_interact_cooldown(&mut self, cooldown: Option<Duration>) {
        self.interact_cooldown = cooldown;
    }

    pub fn set_text_opacity(&mut self, opacity: Option<TextOpacity>) {
        self.text_opacity = opacity;
    }

    /// Override one 1-based line, `None` drops the override
    pub fn set_line_opacity(&mut self, line: u32, opacity: Option<TextOpacity>) {
        match opacity {
            Some(o) => {
                self.line_opacity.insert(line, o);
            }
            None => {
                self.line_opacity.remove(&line);
            }
        }
    }

    pub fn reset_line_opacities(&mut self) {
        self.line_opacity.clear();
    }

    pub fn set_on_fire(&mut self, on_fire: Option<bool>) {
        self.on_fire = on_fire;
    }

    pub fn set_move_speed(&mut self, speed: Option<MoveSpeed>) -> Result<(), NpcError> {
        if let Some(speed) = speed {
            let v = speed.value();
            if !(v > 0.0) || !v.is_finite() {
                return Err(NpcError::InvalidMoveSpeed(v));
            }
        }
        self.move_speed = speed.map(|s| s.value());
        Ok(())
    }

    // =========================================================================
    // Raw access
    // =========================================================================

    pub fn skin(&self) -> Option<&Skin> {
        self.skin.as_ref()
    }

    pub fn text(&self) -> Option<&[String]> {
        self.text.as_deref()
    }

    pub fn pose(&self) -> Option<Pose> {
        self.pose
    }

    pub fn follow_look(&self) -> Option<FollowLook> {
        self.follow_look
    }

    pub fn move_speed(&self) -> Option<f64> {
        self.move_speed
    }

    pub fn is_empty(&self) -> bool {
        *self == Attributes::default()
    }
}

fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0_f64.clamp(min, max)
    } else {
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_resolves_to_template() {
        let defaults = AttributeDefaults::default();
        let resolved = Attributes::new().resolve(&defaults);
        assert_eq!(resolved, defaults);
        assert_eq!(resolved.hide_distance, 50.0);
        assert!(resolved.skin.is_fallback());
        assert_eq!(resolved.item(EquipmentSlot::Helmet), ItemStack::air());
    }

    #[test]
    fn test_setting_none_restores_default() {
        let defaults = AttributeDefaults::default();
        let mut attrs = Attributes::new();
        attrs.set_hide_distance(Some(10.0)).unwrap();
        assert_eq!(attrs.resolve(&defaults).hide_distance, 10.0);

        attrs.set_hide_distance(None).unwrap();
        assert_eq!(attrs.resolve(&defaults).hide_distance, DEFAULT_HIDE_DISTANCE);
    }

    #[test]
    fn test_preconditions_leave_state_unchanged() {
        let mut attrs = Attributes::new();
        attrs.set_hide_distance(Some(20.0)).unwrap();

        assert!(attrs.set_hide_distance(Some(0.0)).is_err());
        assert!(attrs.set_hide_distance(Some(-3.0)).is_err());
        assert!(attrs.set_move_speed(Some(MoveSpeed::Custom(0.0))).is_err());

        let defaults = AttributeDefaults::default();
        assert_eq!(attrs.resolve(&defaults).hide_distance, 20.0);
        assert_eq!(attrs.resolve(&defaults).move_speed, 0.1);
    }

    #[test]
    fn test_tab_list_name_length_after_substitution() {
        let mut attrs = Attributes::new();
        // "[NPC] " + 10 chars = 16
        assert!(attrs.set_tab_list_name(Some("[NPC] {id}"), "shopkeeper").is_ok());
        // 17 chars
        let err = attrs.set_tab_list_name(Some("[NPC] {id}"), "shopkeepers");
        assert!(matches!(err, Err(NpcError::TabListNameTooLong { len: 17, .. })));

        let resolved = attrs.resolve(&AttributeDefaults::default());
        assert_eq!(resolved.tab_list_name_for("shopkeeper"), "[NPC] shopkeeper");
    }

    #[test]
    fn test_range_setters_clamp() {
        let mut attrs = Attributes::new();
        attrs.set_line_spacing(Some(5.0));
        attrs.set_text_alignment(Some(Vec3::new(-9.0, 12.0, 1.5)));

        let resolved = attrs.resolve(&AttributeDefaults::default());
        assert_eq!(resolved.line_spacing, MAX_LINE_SPACING);
        assert_eq!(resolved.text_alignment, Vec3::new(-2.0, 5.0, 1.5));
    }

    #[test]
    fn test_overlay_wins_only_where_set() {
        let mut shared = Attributes::new();
        shared.set_text(Some(vec!["Hello".to_string()]));
        shared.set_glowing(Some(true));

        let mut overlay = Attributes::new();
        overlay.set_skin(Some(Skin::new("tex", "sig")));
        overlay.set_glowing(Some(false));

        let merged = overlay.merged_over(&shared).resolve(&AttributeDefaults::default());
        assert_eq!(merged.text, vec!["Hello".to_string()]);
        assert!(!merged.glowing);
        assert_eq!(merged.skin.texture.as_deref(), Some("tex"));
    }

    #[test]
    fn test_line_opacity_falls_back_to_text_opacity() {
        let mut attrs = Attributes::new();
        attrs.set_text_opacity(Some(TextOpacity::Medium));
        attrs.set_line_opacity(2, Some(TextOpacity::Full));

        let resolved = attrs.resolve(&AttributeDefaults::default());
        assert_eq!(resolved.opacity_of(1).times(), 3);
        assert_eq!(resolved.opacity_of(2).times(), 10);

        attrs.reset_line_opacities();
        let resolved = attrs.resolve(&AttributeDefaults::default());
        assert_eq!(resolved.opacity_of(2), TextOpacity::Medium);
    }
}
