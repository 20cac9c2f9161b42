//! Redis cache for hot character records.

use redis::{aio::ConnectionManager, AsyncCommands};

use super::{PersistenceError, PlayerRecord};

/// Cache key prefix, followed by the account id
const PLAYER_PREFIX: &str = "realm:player:";

/// TTL for cached records (1 hour)
const CACHE_TTL_SECONDS: u64 = 3600;

/// Redis cache wrapper
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

fn player_key(account_id: i64) -> String {
    format!("{}{}", PLAYER_PREFIX, account_id)
}

impl Cache {
    /// Connect to Redis
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub async fn save_player(&self, record: &PlayerRecord) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(player_key(record.account_id), json, CACHE_TTL_SECONDS).await?;
        Ok(())
    }

    pub async fn load_player(&self, account_id: i64) -> Result<Option<PlayerRecord>, PersistenceError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(player_key(account_id)).await?;
        Ok(json.and_then(|j| serde_json::from_str(&j).ok()))
    }

    /// Drop the cached record (on logout)
    pub async fn delete_player(&self, account_id: i64) -> Result<(), PersistenceError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(player_key(account_id)).await?;
        Ok(())
    }
}
