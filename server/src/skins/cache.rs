//! Redis cache for resolved skins.

use redis::{aio::ConnectionManager, AsyncCommands, ErrorKind, RedisError};

use crate::npc::Skin;

/// Cache key prefix, followed by the lowercased player name
const SKIN_PREFIX: &str = "skin:";

/// Redis cache wrapper
#[derive(Clone)]
pub struct SkinCache {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl SkinCache {
    /// Connect to Redis
    pub async fn connect(url: &str, ttl_secs: u64) -> Result<Self, RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, ttl_secs })
    }

    /// Store a resolved skin under the player name
    pub async fn save(&self, name: &str, skin: &Skin) -> Result<(), RedisError> {
        let json = serde_json::to_string(skin)
            .map_err(|e| RedisError::from((ErrorKind::TypeError, "skin is not serializable", e.to_string())))?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key(name), json, self.ttl_secs).await?;
        Ok(())
    }

    /// Cached skin for a player name, `None` on miss or unreadable entry
    pub async fn load(&self, name: &str) -> Result<Option<Skin>, RedisError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(key(name)).await?;
        Ok(json.and_then(|j| serde_json::from_str(&j).ok()))
    }

    pub async fn forget(&self, name: &str) -> Result<(), RedisError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key(name)).await?;
        Ok(())
    }
}

fn key(name: &str) -> String {
    format!("{}{}", SKIN_PREFIX, name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_ignore_name_case() {
        assert_eq!(key("Notch"), "skin:notch");
        assert_eq!(key("notch"), key("NOTCH"));
    }
}
