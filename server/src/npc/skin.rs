//! Skin data attached to a fake profile.

use persona_shared::SkinParts;
use serde::{Deserialize, Serialize};

/// Textures property of a game profile.
///
/// `texture` and `signature` are the base64 blobs exactly as the session
/// server returns them. A skin without a texture renders as the default model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Skin {
    pub texture: Option<String>,
    pub signature: Option<String>,
    /// Name of the player the skin was taken from, if any
    pub player_name: Option<String>,
    /// Visible second-layer parts
    #[serde(default)]
    pub parts: SkinParts,
}

impl Skin {
    pub fn new(texture: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            texture: Some(texture.into()),
            signature: Some(signature.into()),
            player_name: None,
            parts: SkinParts::ALL,
        }
    }

    /// Profile with no textures property
    pub fn fallback() -> Self {
        Self::default()
    }

    pub fn from_player(name: impl Into<String>, texture: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            player_name: Some(name.into()),
            ..Self::new(texture, signature)
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.texture.is_none()
    }

    pub fn with_parts(mut self, parts: SkinParts) -> Self {
        self.parts = parts;
        self
    }

    /// Same texture and signature, ignoring parts and source name
    pub fn same_texture(&self, other: &Skin) -> bool {
        self.texture == other.texture && self.signature == other.signature
    }
}
