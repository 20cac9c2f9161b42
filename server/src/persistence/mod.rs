//! Persistence layer for the realm server.
//!
//! The game loop never blocks on I/O. Saves and logouts are queued to a
//! background task; the only awaited calls (token check, character load)
//! happen in connection tasks before a player reaches the world.

mod cache;
mod database;
mod memory;
mod record;

pub use cache::Cache;
pub use database::Database;
pub use memory::MemoryStore;
pub use record::PlayerRecord;

use std::future::Future;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Queue depth of the background task
const COMMAND_QUEUE: usize = 1024;

/// Attempts per write before giving up
const MAX_ATTEMPTS: u32 = 5;

/// First retry delay, doubled after every failed attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("persistence task is not running")]
    Unavailable,
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<PersistenceError>,
    },
}

/// Account and character storage
pub trait PlayerStore: Send + Sync + 'static {
    /// Account id bound to a bearer token, if any
    fn verify_token(&self, token: &str) -> impl Future<Output = Result<Option<i64>, PersistenceError>> + Send;

    fn load_player(&self, account_id: i64) -> impl Future<Output = Result<Option<PlayerRecord>, PersistenceError>> + Send;

    /// Insert a new character, returning its id
    fn create_player(&self, record: &PlayerRecord) -> impl Future<Output = Result<i64, PersistenceError>> + Send;

    /// Upsert a character by account, returning its id
    fn save_player(&self, record: &PlayerRecord) -> impl Future<Output = Result<i64, PersistenceError>> + Send;

    fn count_players(&self) -> impl Future<Output = Result<i64, PersistenceError>> + Send;

    fn mark_logged_in(&self, account_id: i64) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    /// Clear the logged-in flag, optionally revoking the token
    fn logout(&self, account_id: i64, remove_token: bool) -> impl Future<Output = Result<(), PersistenceError>> + Send;
}

/// PostgreSQL storage with an optional Redis cache in front of character reads
#[derive(Clone)]
pub struct PostgresStore {
    db: Database,
    cache: Option<Cache>,
}

impl PostgresStore {
    pub fn new(db: Database, cache: Option<Cache>) -> Self {
        Self { db, cache }
    }
}

impl PlayerStore for PostgresStore {
    async fn verify_token(&self, token: &str) -> Result<Option<i64>, PersistenceError> {
        Ok(self.db.account_for_token(token).await?)
    }

    async fn load_player(&self, account_id: i64) -> Result<Option<PlayerRecord>, PersistenceError> {
        if let Some(cache) = &self.cache {
            match cache.load_player(account_id).await {
                Ok(Some(record)) => {
                    debug!("Loaded account {} character from cache", account_id);
                    return Ok(Some(record));
                }
                Ok(None) => {}
                Err(e) => warn!("Cache read for account {} failed: {}", account_id, e),
            }
        }

        let record = self.db.load_player(account_id).await?;
        if let (Some(cache), Some(record)) = (&self.cache, &record) {
            // Populate cache for next time
            if let Err(e) = cache.save_player(record).await {
                warn!("Failed to cache account {} character: {}", account_id, e);
            }
        }
        Ok(record)
    }

    async fn create_player(&self, record: &PlayerRecord) -> Result<i64, PersistenceError> {
        self.save_player(record).await
    }

    async fn save_player(&self, record: &PlayerRecord) -> Result<i64, PersistenceError> {
        let id = self.db.save_player(record).await?;
        if let Some(cache) = &self.cache {
            let mut cached = record.clone();
            cached.id = id;
            if let Err(e) = cache.save_player(&cached).await {
                warn!("Failed to cache character '{}': {}", record.name, e);
            }
        }
        Ok(id)
    }

    async fn count_players(&self) -> Result<i64, PersistenceError> {
        Ok(self.db.count_players().await?)
    }

    async fn mark_logged_in(&self, account_id: i64) -> Result<(), PersistenceError> {
        Ok(self.db.mark_logged_in(account_id).await?)
    }

    async fn logout(&self, account_id: i64, remove_token: bool) -> Result<(), PersistenceError> {
        self.db.logout(account_id, remove_token).await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete_player(account_id).await {
                warn!("Failed to evict account {} from cache: {}", account_id, e);
            }
        }
        Ok(())
    }
}

/// Commands sent to the persistence background task
#[derive(Debug)]
pub enum PersistenceCommand {
    VerifyToken {
        token: String,
        response: oneshot::Sender<Result<Option<i64>, PersistenceError>>,
    },
    /// Load the account's character, creating one on first login
    LoadOrCreate {
        account_id: i64,
        response: oneshot::Sender<Result<PlayerRecord, PersistenceError>>,
    },
    SavePlayer { record: PlayerRecord },
    MarkLoggedIn { account_id: i64 },
    Logout { account_id: i64, remove_token: bool },
    /// Finish queued work, then stop
    Shutdown { ack: oneshot::Sender<()> },
}

/// Handle for sending commands to the persistence task
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    sender: mpsc::Sender<PersistenceCommand>,
}

impl PersistenceHandle {
    /// Test helper: a handle whose commands land in the returned receiver
    #[cfg(test)]
    pub fn detached() -> (Self, mpsc::Receiver<PersistenceCommand>) {
        let (sender, rx) = mpsc::channel(COMMAND_QUEUE);
        (Self { sender }, rx)
    }

    fn enqueue(&self, command: PersistenceCommand) {
        if let Err(e) = self.sender.try_send(command) {
            error!("Dropped persistence command: {}", e);
        }
    }

    async fn request<T>(
        &self,
        command: PersistenceCommand,
        rx: oneshot::Receiver<Result<T, PersistenceError>>,
    ) -> Result<T, PersistenceError> {
        self.sender.send(command).await.map_err(|_| PersistenceError::Unavailable)?;
        rx.await.map_err(|_| PersistenceError::Unavailable)?
    }

    pub async fn verify_token(&self, token: &str) -> Result<Option<i64>, PersistenceError> {
        let (response, rx) = oneshot::channel();
        self.request(PersistenceCommand::VerifyToken { token: token.to_string(), response }, rx).await
    }

    pub async fn load_or_create(&self, account_id: i64) -> Result<PlayerRecord, PersistenceError> {
        let (response, rx) = oneshot::channel();
        self.request(PersistenceCommand::LoadOrCreate { account_id, response }, rx).await
    }

    /// Save a character (fire and forget)
    pub fn save_player(&self, record: PlayerRecord) {
        self.enqueue(PersistenceCommand::SavePlayer { record });
    }

    pub fn mark_logged_in(&self, account_id: i64) {
        self.enqueue(PersistenceCommand::MarkLoggedIn { account_id });
    }

    pub fn logout(&self, account_id: i64, remove_token: bool) {
        self.enqueue(PersistenceCommand::Logout { account_id, remove_token });
    }

    /// Wait until every queued command has been processed and the task stopped
    pub async fn shutdown(&self) {
        let (ack, rx) = oneshot::channel();
        if self.sender.send(PersistenceCommand::Shutdown { ack }).await.is_err() {
            warn!("Persistence task already stopped");
            return;
        }
        let _ = rx.await;
    }
}

/// Spawn the background task over `store` and return its handle
pub fn spawn<S: PlayerStore>(store: S) -> PersistenceHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    tokio::spawn(persistence_task(store, rx));
    info!("Persistence background task started");
    PersistenceHandle { sender: tx }
}

/// Run a write until it succeeds or the attempts run out
async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PersistenceError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < MAX_ATTEMPTS => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                warn!("{} failed (attempt {}/{}): {}; retrying in {:?}", what, attempt + 1, MAX_ATTEMPTS, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(PersistenceError::RetriesExhausted { attempts: attempt + 1, last: Box::new(e) });
            }
        }
    }
}

async fn load_or_create<S: PlayerStore>(store: &S, account_id: i64) -> Result<PlayerRecord, PersistenceError> {
    if let Some(record) = store.load_player(account_id).await? {
        debug!("Loaded character '{}' for account {}", record.name, account_id);
        return Ok(record);
    }

    let count = store.count_players().await?;
    let mut record = PlayerRecord::new_for_account(account_id, format!("Player{}", count + 1));
    let id = with_retry("create player", || store.create_player(&record)).await?;
    record.id = id;
    info!("Created character '{}' ({}) for account {}", record.name, record.id, account_id);
    Ok(record)
}

/// Background task that handles all persistence operations, in order
async fn persistence_task<S: PlayerStore>(store: S, mut rx: mpsc::Receiver<PersistenceCommand>) {
    info!("Persistence task running");

    while let Some(command) = rx.recv().await {
        match command {
            PersistenceCommand::VerifyToken { token, response } => {
                let _ = response.send(store.verify_token(&token).await);
            }

            PersistenceCommand::LoadOrCreate { account_id, response } => {
                let _ = response.send(load_or_create(&store, account_id).await);
            }

            PersistenceCommand::SavePlayer { record } => {
                match with_retry("save player", || store.save_player(&record)).await {
                    Ok(id) => debug!("Saved character '{}' ({})", record.name, id),
                    Err(e) => error!("Giving up saving character '{}': {}", record.name, e),
                }
            }

            PersistenceCommand::MarkLoggedIn { account_id } => {
                if let Err(e) = with_retry("mark logged in", || store.mark_logged_in(account_id)).await {
                    error!("Failed to mark account {} logged in: {}", account_id, e);
                }
            }

            PersistenceCommand::Logout { account_id, remove_token } => {
                if let Err(e) = with_retry("logout", || store.logout(account_id, remove_token)).await {
                    error!("Failed to log out account {}: {}", account_id, e);
                }
            }

            PersistenceCommand::Shutdown { ack } => {
                info!("Persistence task shutting down");
                let _ = ack.send(());
                break;
            }
        }
    }

    info!("Persistence task stopped");
}
