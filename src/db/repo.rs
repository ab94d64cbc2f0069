use super::model::PinnedVerseRow;
use crate::model::PinnedVerse;
use anyhow::{Context, Result};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::BTreeMap;
use tracing::instrument;

pub type Pool = SqlitePool;

pub const LAST_SYNC_AT_KEY: &str = "last_sync_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open {}", normalized))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/`, create the parent
/// directory and add `mode=rwc` so the file is created on first use.
/// In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", expanded, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn fetch_pinned(conn: &mut SqliteConnection) -> Result<Vec<PinnedVerse>> {
    let rows: Vec<PinnedVerseRow> = sqlx::query_as(
        "SELECT verse_key, chapter_number, verse_number, timestamp, server_id \
         FROM pinned_verses ORDER BY timestamp, rowid",
    )
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(PinnedVerse::try_from).collect()
}

#[instrument(skip_all)]
pub async fn list_pinned_verses(pool: &Pool) -> Result<Vec<PinnedVerse>> {
    let mut conn = pool.acquire().await?;
    fetch_pinned(&mut conn).await
}

/// Same as [`list_pinned_verses`] but inside an open transaction.
pub async fn list_pinned_verses_tx(tx: &mut Transaction<'_, Sqlite>) -> Result<Vec<PinnedVerse>> {
    fetch_pinned(&mut **tx).await
}

/// Replace the whole pinned list inside an open transaction.
pub async fn replace_pinned_verses_tx(
    tx: &mut Transaction<'_, Sqlite>,
    verses: &[PinnedVerse],
) -> Result<()> {
    sqlx::query("DELETE FROM pinned_verses")
        .execute(&mut **tx)
        .await?;
    for v in verses {
        sqlx::query(
            "INSERT INTO pinned_verses (verse_key, chapter_number, verse_number, timestamp, server_id) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&v.verse_key)
        .bind(i64::from(v.chapter_number))
        .bind(i64::from(v.verse_number))
        .bind(v.timestamp)
        .bind(v.server_id.as_deref())
        .execute(&mut **tx)
        .await
        .with_context(|| format!("failed to store pinned verse {}", v.verse_key))?;
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn replace_pinned_verses(pool: &Pool, verses: &[PinnedVerse]) -> Result<()> {
    let mut tx = pool.begin().await?;
    replace_pinned_verses_tx(&mut tx, verses).await?;
    tx.commit().await?;
    Ok(())
}

/// Attach server ids to already-stored pins. Returns the number of rows updated.
#[instrument(skip_all)]
pub async fn set_server_ids(pool: &Pool, ids: &BTreeMap<String, String>) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut updated = 0;
    for (verse_key, server_id) in ids {
        updated += sqlx::query("UPDATE pinned_verses SET server_id = ? WHERE verse_key = ?")
            .bind(server_id)
            .bind(verse_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;
    Ok(updated)
}

#[instrument(skip_all)]
pub async fn get_state(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM sync_state WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn set_state(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_state (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_last_sync_at(pool: &Pool) -> Result<Option<String>> {
    get_state(pool, LAST_SYNC_AT_KEY).await
}

pub async fn set_last_sync_at(pool: &Pool, at: &str) -> Result<()> {
    set_state(pool, LAST_SYNC_AT_KEY, at).await
}
