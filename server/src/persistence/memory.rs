//! In-process store used when no database is reachable.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{PersistenceError, PlayerRecord, PlayerStore};

#[derive(Debug, Default)]
struct MemoryState {
    /// Bearer token -> account id
    tokens: HashMap<String, i64>,
    logged_in: HashSet<i64>,
    /// Characters by account id
    players: HashMap<i64, PlayerRecord>,
    next_player_id: i64,
}

/// Volatile account and character storage
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Store that accepts the given (token, account id) pairs
    pub fn with_tokens(tokens: impl IntoIterator<Item = (String, i64)>) -> Self {
        let state = MemoryState {
            tokens: tokens.into_iter().collect(),
            ..MemoryState::default()
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }
}

impl PlayerStore for MemoryStore {
    async fn verify_token(&self, token: &str) -> Result<Option<i64>, PersistenceError> {
        Ok(self.state.lock().await.tokens.get(token).copied())
    }

    async fn load_player(&self, account_id: i64) -> Result<Option<PlayerRecord>, PersistenceError> {
        Ok(self.state.lock().await.players.get(&account_id).cloned())
    }

    async fn create_player(&self, record: &PlayerRecord) -> Result<i64, PersistenceError> {
        self.save_player(record).await
    }

    async fn save_player(&self, record: &PlayerRecord) -> Result<i64, PersistenceError> {
        let mut state = self.state.lock().await;
        let id = match state.players.get(&record.account_id) {
            Some(existing) => existing.id,
            None => {
                state.next_player_id += 1;
                state.next_player_id
            }
        };
        let mut record = record.clone();
        record.id = id;
        state.players.insert(record.account_id, record);
        Ok(id)
    }

    async fn count_players(&self) -> Result<i64, PersistenceError> {
        Ok(self.state.lock().await.players.len() as i64)
    }

    async fn mark_logged_in(&self, account_id: i64) -> Result<(), PersistenceError> {
        self.state.lock().await.logged_in.insert(account_id);
        Ok(())
    }

    async fn logout(&self, account_id: i64, remove_token: bool) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        state.logged_in.remove(&account_id);
        if remove_token {
            state.tokens.retain(|_, account| *account != account_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl MemoryStore {
        async fn is_logged_in(&self, account_id: i64) -> bool {
            self.state.lock().await.logged_in.contains(&account_id)
        }
    }

    #[tokio::test]
    async fn test_save_keeps_id_per_account() {
        let store = MemoryStore::default();
        let record = PlayerRecord::new_for_account(4, "Dora");
        let id = store.create_player(&record).await.unwrap();
        assert_eq!(store.save_player(&record).await.unwrap(), id);
        assert_eq!(store.count_players().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_logout_flags() {
        let store = MemoryStore::with_tokens([("t".to_string(), 4)]);
        store.mark_logged_in(4).await.unwrap();
        assert!(store.is_logged_in(4).await);

        store.logout(4, false).await.unwrap();
        assert!(!store.is_logged_in(4).await);
        assert_eq!(store.verify_token("t").await.unwrap(), Some(4));

        store.logout(4, true).await.unwrap();
        assert_eq!(store.verify_token("t").await.unwrap(), None);
    }
}
