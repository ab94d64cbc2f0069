//! Client-side state for pinned verses.
//!
//! All mutations go through [`PinnedAction`] and the pure [`reduce`] function;
//! stores only decide where the resulting list lives.
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, instrument};

use crate::db::{self, Pool};
use crate::model::PinnedVerse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinnedAction {
    PinVerse(PinnedVerse),
    PinVerses(Vec<PinnedVerse>),
    UnpinVerse(String),
    ClearPinnedVerses,
    /// Wholesale replacement after a successful merge.
    SetPinnedVerses(Vec<PinnedVerse>),
    /// `verse_key -> server id`.
    SetServerIds(BTreeMap<String, String>),
}

impl PinnedAction {
    pub fn name(&self) -> &'static str {
        match self {
            PinnedAction::PinVerse(_) => "pin_verse",
            PinnedAction::PinVerses(_) => "pin_verses",
            PinnedAction::UnpinVerse(_) => "unpin_verse",
            PinnedAction::ClearPinnedVerses => "clear_pinned_verses",
            PinnedAction::SetPinnedVerses(_) => "set_pinned_verses",
            PinnedAction::SetServerIds(_) => "set_server_ids",
        }
    }
}

fn pin(state: &mut Vec<PinnedVerse>, verse: PinnedVerse) {
    if !state.iter().any(|v| v.verse_key == verse.verse_key) {
        state.push(verse);
    }
}

/// Apply `action` to `state`. Keys stay unique and the list stays sorted by
/// timestamp.
pub fn reduce(state: &mut Vec<PinnedVerse>, action: PinnedAction) {
    match action {
        PinnedAction::PinVerse(verse) => pin(state, verse),
        PinnedAction::PinVerses(verses) => {
            for verse in verses {
                pin(state, verse);
            }
        }
        PinnedAction::UnpinVerse(key) => state.retain(|v| v.verse_key != key),
        PinnedAction::ClearPinnedVerses => state.clear(),
        PinnedAction::SetPinnedVerses(verses) => {
            state.clear();
            for verse in verses {
                pin(state, verse);
            }
        }
        PinnedAction::SetServerIds(ids) => {
            for v in state.iter_mut() {
                if let Some(id) = ids.get(&v.verse_key) {
                    v.server_id = Some(id.clone());
                }
            }
        }
    }
    state.sort_by_key(|v| v.timestamp);
}

/// Holder of the local pinned list.
#[async_trait]
pub trait PinnedStore: Send + Sync {
    async fn snapshot(&self) -> Result<Vec<PinnedVerse>>;

    async fn dispatch(&self, action: PinnedAction) -> Result<()>;
}

/// Readiness marker written by the main (bookmarks / reading sessions) sync.
#[async_trait]
pub trait LastSyncSource: Send + Sync {
    async fn last_sync_at(&self) -> Result<Option<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    pinned: Mutex<Vec<PinnedVerse>>,
    last_sync_at: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pinned(verses: Vec<PinnedVerse>) -> Self {
        let store = Self::default();
        if let Ok(mut guard) = store.pinned.lock() {
            reduce(&mut guard, PinnedAction::SetPinnedVerses(verses));
        }
        store
    }

    pub fn set_last_sync_at(&self, at: Option<String>) {
        if let Ok(mut guard) = self.last_sync_at.lock() {
            *guard = at;
        }
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> anyhow::Error {
    anyhow::anyhow!("pinned store lock poisoned")
}

#[async_trait]
impl PinnedStore for MemoryStore {
    async fn snapshot(&self) -> Result<Vec<PinnedVerse>> {
        Ok(self.pinned.lock().map_err(poisoned)?.clone())
    }

    async fn dispatch(&self, action: PinnedAction) -> Result<()> {
        debug!(action = action.name(), "dispatch");
        let mut guard = self.pinned.lock().map_err(poisoned)?;
        reduce(&mut guard, action);
        Ok(())
    }
}

#[async_trait]
impl LastSyncSource for MemoryStore {
    async fn last_sync_at(&self) -> Result<Option<String>> {
        Ok(self.last_sync_at.lock().map_err(poisoned)?.clone())
    }
}

/// Pinned list persisted in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Record that the main sync finished now.
    pub async fn mark_main_sync_complete(&self) -> Result<String> {
        let at = Utc::now().to_rfc3339();
        db::set_last_sync_at(&self.pool, &at).await?;
        Ok(at)
    }
}

#[async_trait]
impl PinnedStore for SqliteStore {
    async fn snapshot(&self) -> Result<Vec<PinnedVerse>> {
        db::list_pinned_verses(&self.pool).await
    }

    #[instrument(skip_all, fields(action = action.name()))]
    async fn dispatch(&self, action: PinnedAction) -> Result<()> {
        if let PinnedAction::SetServerIds(ids) = &action {
            db::set_server_ids(&self.pool, ids).await?;
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        let mut state = db::list_pinned_verses_tx(&mut tx).await?;
        reduce(&mut state, action);
        db::replace_pinned_verses_tx(&mut tx, &state).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LastSyncSource for SqliteStore {
    async fn last_sync_at(&self) -> Result<Option<String>> {
        db::get_last_sync_at(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verse_key::VerseKey;

    fn verse(key: &str, ts: i64) -> PinnedVerse {
        PinnedVerse::new(VerseKey::parse(key).unwrap(), ts)
    }

    fn keys(state: &[PinnedVerse]) -> Vec<&str> {
        state.iter().map(|v| v.verse_key.as_str()).collect()
    }

    #[test]
    fn pin_is_idempotent_and_sorted() {
        let mut state = Vec::new();
        reduce(&mut state, PinnedAction::PinVerse(verse("2:1", 20)));
        reduce(&mut state, PinnedAction::PinVerse(verse("1:1", 10)));
        reduce(&mut state, PinnedAction::PinVerse(verse("2:1", 5)));
        assert_eq!(keys(&state), vec!["1:1", "2:1"]);
        assert_eq!(state[1].timestamp, 20);
    }

    #[test]
    fn unpin_and_clear() {
        let mut state = Vec::new();
        reduce(
            &mut state,
            PinnedAction::PinVerses(vec![verse("1:1", 1), verse("1:2", 2), verse("1:3", 3)]),
        );
        reduce(&mut state, PinnedAction::UnpinVerse("1:2".into()));
        assert_eq!(keys(&state), vec!["1:1", "1:3"]);
        reduce(&mut state, PinnedAction::ClearPinnedVerses);
        assert!(state.is_empty());
    }

    #[test]
    fn set_pinned_replaces_wholesale() {
        let mut state = vec![verse("1:1", 1)];
        reduce(
            &mut state,
            PinnedAction::SetPinnedVerses(vec![verse("3:3", 9), verse("2:2", 4)]),
        );
        assert_eq!(keys(&state), vec!["2:2", "3:3"]);
    }

    #[test]
    fn server_ids_attach_only_to_known_keys() {
        let mut state = vec![verse("1:1", 1), verse("2:2", 2)];
        let ids = BTreeMap::from([
            ("2:2".to_string(), "s2".to_string()),
            ("9:9".to_string(), "s9".to_string()),
        ]);
        reduce(&mut state, PinnedAction::SetServerIds(ids));
        assert_eq!(state.len(), 2);
        assert_eq!(state[0].server_id, None);
        assert_eq!(state[1].server_id.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn memory_store_dispatches_through_reducer() {
        let store = MemoryStore::with_pinned(vec![verse("5:5", 50)]);
        store
            .dispatch(PinnedAction::PinVerse(verse("4:4", 40)))
            .await
            .unwrap();
        let snap = store.snapshot().await.unwrap();
        assert_eq!(keys(&snap), vec!["4:4", "5:5"]);

        assert_eq!(store.last_sync_at().await.unwrap(), None);
        store.set_last_sync_at(Some("2024-01-01T00:00:00Z".into()));
        assert!(store.last_sync_at().await.unwrap().is_some());
    }
}
