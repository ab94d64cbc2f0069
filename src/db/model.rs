//! Row models returned by repositories.

use anyhow::{Context, Result};
use sqlx::FromRow;

use crate::model::PinnedVerse;

#[derive(Debug, Clone, FromRow)]
pub struct PinnedVerseRow {
    pub verse_key: String,
    pub chapter_number: i64,
    pub verse_number: i64,
    pub timestamp: i64,
    pub server_id: Option<String>,
}

impl TryFrom<PinnedVerseRow> for PinnedVerse {
    type Error = anyhow::Error;

    fn try_from(row: PinnedVerseRow) -> Result<Self> {
        Ok(PinnedVerse {
            chapter_number: u32::try_from(row.chapter_number)
                .with_context(|| format!("bad chapter_number for {}", row.verse_key))?,
            verse_number: u32::try_from(row.verse_number)
                .with_context(|| format!("bad verse_number for {}", row.verse_key))?,
            verse_key: row.verse_key,
            timestamp: row.timestamp,
            server_id: row.server_id,
        })
    }
}
