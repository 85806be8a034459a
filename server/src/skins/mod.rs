//! Skin lookup by player name.
//!
//! Lookups never block the tick. The registry sends requests through a
//! [`SkinFetcher`] handle to a background task, which resolves them from its
//! memory cache, the optional Redis cache or the remote profile service, and
//! answers on a channel the registry drains every tick. Failures resolve to
//! the fallback skin.

mod cache;

pub use cache::SkinCache;

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::SkinConfig;
use crate::error::NpcError;
use crate::npc::Skin;
use crate::world::ViewerId;

/// Name of the profile property holding the textures
const TEXTURES_PROPERTY: &str = "textures";

/// Pending requests before `fetch` starts dropping them
const COMMAND_BUFFER: usize = 256;

/// Where a fetched skin goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkinTarget {
    Personal { viewer: ViewerId, code: String },
    /// Shared skin of a global NPC
    Global { code: String },
    /// One viewer's overlay of a global NPC
    Overlay { code: String, viewer: ViewerId },
}

/// A finished lookup
#[derive(Debug, Clone)]
pub struct SkinFetched {
    pub target: SkinTarget,
    pub name: String,
    pub skin: Skin,
}

#[derive(Debug, Error)]
pub enum SkinError {
    #[error("no profile named '{0}'")]
    NotFound(String),

    #[error("profile service answered {0}")]
    Status(u16),

    #[error("profile has no textures property")]
    NoTextures,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Commands sent to the skin background task
#[derive(Debug)]
pub enum SkinCommand {
    Fetch { name: String, target: SkinTarget },
    /// Drop a name from every cache layer
    Forget { name: String },
    Shutdown,
}

/// Handle for sending requests to the skin task
#[derive(Debug, Clone)]
pub struct SkinFetcher {
    sender: mpsc::Sender<SkinCommand>,
}

impl SkinFetcher {
    pub(crate) fn from_sender(sender: mpsc::Sender<SkinCommand>) -> Self {
        Self { sender }
    }

    /// Queue a lookup (non-blocking). `false` if the task is gone or busy.
    pub fn fetch(&self, name: impl Into<String>, target: SkinTarget) -> bool {
        let name = name.into();
        match self.sender.try_send(SkinCommand::Fetch { name, target }) {
            Ok(()) => true,
            Err(e) => {
                warn!("Skin request dropped: {}", e);
                false
            }
        }
    }

    pub fn forget(&self, name: impl Into<String>) {
        let _ = self.sender.try_send(SkinCommand::Forget { name: name.into() });
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(SkinCommand::Shutdown).await;
    }
}

/// Receiving end of finished lookups, drained by the registry
#[derive(Debug)]
pub struct SkinResults {
    receiver: mpsc::UnboundedReceiver<SkinFetched>,
}

impl SkinResults {
    pub(crate) fn from_receiver(receiver: mpsc::UnboundedReceiver<SkinFetched>) -> Self {
        Self { receiver }
    }

    /// Everything that finished since the last call
    pub fn poll(&mut self) -> Vec<SkinFetched> {
        let mut done = Vec::new();
        while let Ok(fetched) = self.receiver.try_recv() {
            done.push(fetched);
        }
        done
    }
}

/// Start the skin task. Redis is optional; a failed connection only
/// disables that layer.
pub async fn init(config: &SkinConfig) -> Result<(SkinFetcher, SkinResults), NpcError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| NpcError::Config(format!("http client: {}", e)))?;

    let cache = match config.redis_url.as_deref() {
        Some(url) => match SkinCache::connect(url, config.cache_ttl_secs).await {
            Ok(cache) => {
                info!("Connected to Redis skin cache");
                Some(cache)
            }
            Err(e) => {
                warn!("Redis skin cache unavailable, continuing without it: {}", e);
                None
            }
        },
        None => None,
    };

    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let lookup = RemoteLookup {
        client,
        profile_url: config.profile_url.clone(),
        session_url: config.session_url.clone(),
    };
    tokio::spawn(skin_task(lookup, cache, rx, done_tx));
    info!("Skin background task started");

    Ok((SkinFetcher::from_sender(tx), SkinResults::from_receiver(done_rx)))
}

/// Background task that answers skin requests
async fn skin_task(
    lookup: RemoteLookup,
    cache: Option<SkinCache>,
    mut rx: mpsc::Receiver<SkinCommand>,
    done: mpsc::UnboundedSender<SkinFetched>,
) {
    let mut memory: HashMap<String, Skin> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            SkinCommand::Fetch { name, target } => {
                let key = name.to_lowercase();
                let skin = match memory.get(&key) {
                    Some(skin) => skin.clone(),
                    None => match resolve(&lookup, cache.as_ref(), &name).await {
                        Ok(skin) => {
                            memory.insert(key, skin.clone());
                            skin
                        }
                        Err(e) => {
                            warn!("Skin lookup for '{}' failed, using fallback: {}", name, e);
                            Skin::fallback()
                        }
                    },
                };
                if done.send(SkinFetched { target, name, skin }).is_err() {
                    break;
                }
            }

            SkinCommand::Forget { name } => {
                memory.remove(&name.to_lowercase());
                if let Some(cache) = cache.as_ref() {
                    if let Err(e) = cache.forget(&name).await {
                        warn!("Failed to drop cached skin of '{}': {}", name, e);
                    }
                }
            }

            SkinCommand::Shutdown => {
                info!("Skin task shutting down");
                break;
            }
        }
    }

    info!("Skin task stopped");
}

/// Redis first, then the remote service, caching what it returns
async fn resolve(lookup: &RemoteLookup, cache: Option<&SkinCache>, name: &str) -> Result<Skin, SkinError> {
    if let Some(cache) = cache {
        match cache.load(name).await {
            Ok(Some(skin)) => {
                debug!("Skin of '{}' loaded from cache", name);
                return Ok(skin);
            }
            Ok(None) => {}
            Err(e) => warn!("Skin cache read for '{}' failed: {}", name, e),
        }
    }

    let skin = lookup.fetch(name).await?;
    if let Some(cache) = cache {
        if let Err(e) = cache.save(name, &skin).await {
            warn!("Failed to cache skin of '{}': {}", name, e);
        }
    }
    Ok(skin)
}

// =============================================================================
// Remote profile service
// =============================================================================

struct RemoteLookup {
    client: reqwest::Client,
    profile_url: String,
    session_url: String,
}

impl RemoteLookup {
    /// name -> profile id -> signed textures
    async fn fetch(&self, name: &str) -> Result<Skin, SkinError> {
        let url = format!("{}{}", self.profile_url, name);
        let resp = self.client.get(url).send().await?;
        match resp.status() {
            StatusCode::OK => {}
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Err(SkinError::NotFound(name.to_string())),
            status => return Err(SkinError::Status(status.as_u16())),
        }
        let id = parse_profile_id(&resp.text().await?)?;

        let url = format!("{}{}?unsigned=false", self.session_url, id);
        let resp = self.client.get(url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(SkinError::Status(resp.status().as_u16()));
        }
        let skin = parse_textures(&resp.text().await?, name)?;
        info!("Fetched skin of '{}' ({})", name, id);
        Ok(skin)
    }
}

#[derive(Deserialize)]
struct ProfileIdResponse {
    id: String,
}

#[derive(Deserialize)]
struct ProfileResponse {
    #[serde(default)]
    properties: Vec<ProfileProperty>,
}

#[derive(Deserialize)]
struct ProfileProperty {
    name: String,
    value: String,
    signature: Option<String>,
}

/// Profile id from a name lookup response
pub fn parse_profile_id(body: &str) -> Result<String, SkinError> {
    let response: ProfileIdResponse = serde_json::from_str(body)?;
    Ok(response.id)
}

/// Signed textures property from a session profile response
pub fn parse_textures(body: &str, name: &str) -> Result<Skin, SkinError> {
    let profile: ProfileResponse = serde_json::from_str(body)?;
    let textures = profile
        .properties
        .into_iter()
        .find(|p| p.name == TEXTURES_PROPERTY)
        .ok_or(SkinError::NoTextures)?;
    Ok(Skin::from_player(name, textures.value, textures.signature.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_profile_id() {
        let body = r#"{"id":"069a79f444e94726a5befca90e38aaf5","name":"Notch"}"#;
        assert_eq!(parse_profile_id(body).unwrap(), "069a79f444e94726a5befca90e38aaf5");
        assert!(parse_profile_id("{}").is_err());
    }

    #[test]
    fn test_parse_textures() {
        let body = r#"{
            "id": "069a79f444e94726a5befca90e38aaf5",
            "name": "Notch",
            "properties": [
                {"name": "textures", "value": "ewogICJ0aW1lc3RhbXAi", "signature": "c2lnbmF0dXJl"}
            ]
        }"#;
        let skin = parse_textures(body, "Notch").unwrap();
        assert_eq!(skin.texture.as_deref(), Some("ewogICJ0aW1lc3RhbXAi"));
        assert_eq!(skin.signature.as_deref(), Some("c2lnbmF0dXJl"));
        assert_eq!(skin.player_name.as_deref(), Some("Notch"));
    }

    #[test]
    fn test_profile_without_textures() {
        let body = r#"{"id":"x","name":"Notch","properties":[]}"#;
        assert!(matches!(parse_textures(body, "Notch"), Err(SkinError::NoTextures)));
    }

    #[tokio::test]
    async fn test_results_drain_in_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut results = SkinResults::from_receiver(rx);
        assert!(results.poll().is_empty());

        for name in ["a", "b"] {
            tx.send(SkinFetched {
                target: SkinTarget::Global { code: "board".to_string() },
                name: name.to_string(),
                skin: Skin::fallback(),
            })
            .unwrap();
        }
        let names: Vec<String> = results.poll().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fetch_reports_closed_task() {
        let (tx, rx) = mpsc::channel(1);
        let fetcher = SkinFetcher::from_sender(tx);
        drop(rx);
        assert!(!fetcher.fetch("Notch", SkinTarget::Global { code: "board".to_string() }));
    }
}
