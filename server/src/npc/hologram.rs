//! Floating text above an NPC.
//!
//! Every line is a stack of invisible marker armor stands carrying the line
//! as their custom name. Stacking several markers at the same spot makes the
//! text look more opaque, so the number of markers per line is the line's
//! opacity "times" value. The slot layout is fixed until the next rebuild.

use std::collections::BTreeMap;
use log::{debug, trace};
use persona_shared::{
    encode_relative_delta, entity_flags, marker_flags, EntityId, MetadataEntry, ProfileId, ServerPacket,
};

use super::attributes::ResolvedAttributes;
use crate::error::NpcError;
use crate::math::{Location, Vec3};
use crate::protocol::{send_or_log, ProtocolAdapter};
use crate::world::ViewerId;

/// One marker entity of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub entity_id: EntityId,
    pub profile_id: ProfileId,
}

/// Text stack of one NPC for one viewer
#[derive(Debug, Clone)]
pub struct Hologram {
    viewer: ViewerId,
    /// NPC location plus the text alignment offset
    anchor: Location,
    spacing: f64,
    /// Line number (1-based) to markers
    lines: BTreeMap<u32, Vec<Marker>>,
    /// Current text per line; empty lines keep their markers but hide the name
    texts: BTreeMap<u32, String>,
    shown: bool,
}

impl Hologram {
    /// Build the slot layout for the current text, nothing is sent yet
    pub fn new(
        viewer: ViewerId,
        base: &Location,
        attrs: &ResolvedAttributes,
        protocol: &mut dyn ProtocolAdapter,
    ) -> Self {
        let mut hologram = Self {
            viewer,
            anchor: base.offset(attrs.text_alignment),
            spacing: attrs.line_spacing,
            lines: BTreeMap::new(),
            texts: BTreeMap::new(),
            shown: false,
        };
        hologram.build(attrs, protocol);
        hologram
    }

    fn build(&mut self, attrs: &ResolvedAttributes, protocol: &mut dyn ProtocolAdapter) {
        self.lines.clear();
        self.texts.clear();
        for text in &attrs.text {
            let line = self.next_free_line();
            let markers = (0..attrs.opacity_of(line).times())
                .map(|_| Marker {
                    entity_id: protocol.allocate_entity_id(),
                    profile_id: ProfileId::from_random_bits(rand::random()),
                })
                .collect();
            self.lines.insert(line, markers);
            self.texts.insert(line, text.clone());
        }
        trace!("Built hologram with {} lines for viewer {}", self.lines.len(), self.viewer);
    }

    /// Lowest positive line number not in use
    pub fn next_free_line(&self) -> u32 {
        (1..).find(|n| !self.lines.contains_key(n)).unwrap_or(1)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn markers(&self, line: u32) -> &[Marker] {
        self.lines.get(&line).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn text(&self, line: u32) -> Option<&str> {
        self.texts.get(&line).map(String::as_str)
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }

    pub fn anchor(&self) -> &Location {
        &self.anchor
    }

    /// Last line sits on the anchor, earlier lines stack upwards
    pub fn line_position(&self, line: u32) -> Vec3 {
        let total = self.lines.len() as f64;
        let offset = self.spacing * (total - line as f64);
        self.anchor.position() + Vec3::new(0.0, offset, 0.0)
    }

    pub fn contains_entity(&self, entity_id: EntityId) -> bool {
        self.lines.values().flatten().any(|m| m.entity_id == entity_id)
    }

    fn all_entity_ids(&self) -> Vec<EntityId> {
        self.lines.values().flatten().map(|m| m.entity_id).collect()
    }

    fn name_entries(text: &str) -> Vec<MetadataEntry> {
        let visible = !text.is_empty();
        vec![
            MetadataEntry::CustomName(if visible { Some(text.to_string()) } else { None }),
            MetadataEntry::CustomNameVisible(visible),
        ]
    }

    // =========================================================================
    // Wire
    // =========================================================================

    /// Spawn every marker. Gating on hidden text and range is the owner's job.
    pub fn show(&mut self, protocol: &mut dyn ProtocolAdapter) {
        if self.shown {
            return;
        }
        for (line, markers) in &self.lines {
            let position = self.line_position(*line).to_array();
            let text = self.texts.get(line).map(String::as_str).unwrap_or("");
            for marker in markers {
                send_or_log(
                    protocol,
                    self.viewer,
                    ServerPacket::SpawnMarker {
                        entity_id: marker.entity_id,
                        profile_id: marker.profile_id,
                        position,
                    },
                );
                let mut entries = vec![
                    MetadataEntry::Flags(entity_flags::INVISIBLE),
                    MetadataEntry::MarkerFlags(
                        marker_flags::SMALL | marker_flags::NO_BASEPLATE | marker_flags::MARKER,
                    ),
                ];
                entries.extend(Self::name_entries(text));
                send_or_log(
                    protocol,
                    self.viewer,
                    ServerPacket::Metadata { entity_id: marker.entity_id, entries },
                );
            }
        }
        self.shown = true;
    }

    pub fn hide(&mut self, protocol: &mut dyn ProtocolAdapter) {
        if !self.shown {
            return;
        }
        let entity_ids = self.all_entity_ids();
        if !entity_ids.is_empty() {
            send_or_log(protocol, self.viewer, ServerPacket::DestroyEntities { entity_ids });
        }
        self.shown = false;
    }

    /// Refresh the names of the existing slots only.
    ///
    /// Extra text lines wait for a rebuild; missing ones blank their slot.
    pub fn update(&mut self, text: &[String], protocol: &mut dyn ProtocolAdapter) {
        let lines: Vec<u32> = self.lines.keys().copied().collect();
        for (index, line) in lines.into_iter().enumerate() {
            let new_text = text.get(index).cloned().unwrap_or_default();
            self.apply_text(line, new_text, protocol);
        }
    }

    /// Change one existing line without respawning
    pub fn set_line(
        &mut self,
        line: u32,
        text: impl Into<String>,
        protocol: &mut dyn ProtocolAdapter,
    ) -> Result<(), NpcError> {
        if !self.lines.contains_key(&line) {
            return Err(NpcError::UnknownLine(line));
        }
        self.apply_text(line, text.into(), protocol);
        Ok(())
    }

    fn apply_text(&mut self, line: u32, text: String, protocol: &mut dyn ProtocolAdapter) {
        if self.texts.get(&line) == Some(&text) {
            return;
        }
        if self.shown {
            for marker in self.markers(line) {
                send_or_log(
                    protocol,
                    self.viewer,
                    ServerPacket::Metadata {
                        entity_id: marker.entity_id,
                        entries: Self::name_entries(&text),
                    },
                );
            }
        }
        self.texts.insert(line, text);
    }

    /// Translate the stack; each axis must fit a relative move
    pub fn move_by(&mut self, delta: Vec3, protocol: &mut dyn ProtocolAdapter) {
        self.anchor = self.anchor.offset(delta);
        if !self.shown {
            return;
        }
        let encoded = (
            encode_relative_delta(delta.x),
            encode_relative_delta(delta.y),
            encode_relative_delta(delta.z),
        );
        match encoded {
            (Some(x), Some(y), Some(z)) => {
                for entity_id in self.all_entity_ids() {
                    send_or_log(
                        protocol,
                        self.viewer,
                        ServerPacket::RelativeMove { entity_id, delta: [x, y, z], on_ground: false },
                    );
                }
            }
            _ => self.sync(protocol),
        }
    }

    /// Re-anchor after the owner moved by other means
    pub fn set_location(&mut self, base: &Location, attrs: &ResolvedAttributes, protocol: &mut dyn ProtocolAdapter) {
        self.anchor = base.offset(attrs.text_alignment);
        if self.shown {
            self.sync(protocol);
        }
    }

    fn sync(&self, protocol: &mut dyn ProtocolAdapter) {
        for (line, markers) in &self.lines {
            let position = self.line_position(*line).to_array();
            for marker in markers {
                send_or_log(
                    protocol,
                    self.viewer,
                    ServerPacket::Teleport {
                        entity_id: marker.entity_id,
                        position,
                        yaw: 0.0,
                        pitch: 0.0,
                        on_ground: false,
                    },
                );
            }
        }
    }

    /// Hide, rebuild with the current line count and opacities, show again
    /// if it was shown
    pub fn force_update(&mut self, base: &Location, attrs: &ResolvedAttributes, protocol: &mut dyn ProtocolAdapter) {
        let was_shown = self.shown;
        self.hide(protocol);
        self.anchor = base.offset(attrs.text_alignment);
        self.spacing = attrs.line_spacing;
        self.build(attrs, protocol);
        if was_shown {
            self.show(protocol);
        }
        debug!("Rebuilt hologram for viewer {} ({} lines)", self.viewer, self.lines.len());
    }
}
