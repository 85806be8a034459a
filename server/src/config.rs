//! Engine configuration.
//!
//! Loaded from a JSON file; every field falls back to its default so a
//! partial file (or none at all) is valid.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::NpcError;

/// Default Mojang name -> UUID endpoint
pub const DEFAULT_PROFILE_URL: &str = "https://api.mojang.com/users/profiles/minecraft/";

/// Default Mojang UUID -> textured profile endpoint
pub const DEFAULT_SESSION_URL: &str = "https://sessionserver.mojang.com/session/minecraft/profile/";

/// How viewer movement is turned into NPC updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UpdateMode {
    /// Update on every qualifying move notification from the host
    OnMove,
    /// Update every `ticks` ticks regardless of movement
    Interval { ticks: u64 },
}

impl Default for UpdateMode {
    fn default() -> Self {
        Self::OnMove
    }
}

/// Skin lookup settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinConfig {
    pub profile_url: String,
    pub session_url: String,
    pub timeout_secs: u64,
    /// Optional redis cache in front of the remote lookup
    pub redis_url: Option<String>,
    pub cache_ttl_secs: u64,
}

impl Default for SkinConfig {
    fn default() -> Self {
        Self {
            profile_url: DEFAULT_PROFILE_URL.to_string(),
            session_url: DEFAULT_SESSION_URL.to_string(),
            timeout_secs: 5,
            redis_url: None,
            cache_ttl_secs: 3600,
        }
    }
}

/// Engine tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NpcConfig {
    pub tick_rate: u32,
    /// Half-angle of the view cone used for hidden -> shown transitions
    pub fov_degrees: f64,
    /// Ticks after `show()` during which range culling is suspended
    pub show_grace_ticks: u64,
    /// Ticks before a spawned profile is removed from the player list
    pub tab_list_hide_ticks: u64,
    pub update_mode: UpdateMode,
    pub behaviour_interval_ticks: u64,
    pub nearest_cache_ttl_ms: u64,
    pub nearest_scan_radius: f64,
    pub skin: SkinConfig,
    pub listen_port: u16,
}

impl Default for NpcConfig {
    fn default() -> Self {
        Self {
            tick_rate: persona_shared::SERVER_TICK_RATE,
            fov_degrees: 60.0,
            show_grace_ticks: 10,
            tab_list_hide_ticks: 20,
            update_mode: UpdateMode::OnMove,
            behaviour_interval_ticks: 20,
            nearest_cache_ttl_ms: 100,
            nearest_scan_radius: 16.0,
            skin: SkinConfig::default(),
            listen_port: persona_shared::DEFAULT_PORT,
        }
    }
}

impl NpcConfig {
    /// Load and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NpcError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let config: NpcConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NpcError> {
        if self.tick_rate == 0 {
            return Err(NpcError::Config("tick_rate must be at least 1".to_string()));
        }
        if !(0.0..=180.0).contains(&self.fov_degrees) {
            return Err(NpcError::Config(format!("fov_degrees {} outside 0..=180", self.fov_degrees)));
        }
        if self.behaviour_interval_ticks == 0 {
            return Err(NpcError::Config("behaviour_interval_ticks must be at least 1".to_string()));
        }
        if let UpdateMode::Interval { ticks: 0 } = self.update_mode {
            return Err(NpcError::Config("update interval must be at least 1 tick".to_string()));
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }

    pub fn nearest_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.nearest_cache_ttl_ms)
    }

    /// `cos(fov)`, the minimum dot product of the view test
    pub fn fov_cos(&self) -> f64 {
        self.fov_degrees.to_radians().cos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "fov_degrees": 45.0, "update_mode": { "mode": "interval", "ticks": 5 } }"#;
        let config: NpcConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.fov_degrees, 45.0);
        assert_eq!(config.update_mode, UpdateMode::Interval { ticks: 5 });
        assert_eq!(config.show_grace_ticks, 10);
        assert_eq!(config.skin.profile_url, DEFAULT_PROFILE_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = NpcConfig {
            update_mode: UpdateMode::Interval { ticks: 0 },
            ..NpcConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
