use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::verse_key::{VerseKey, VerseKeyError};

/// A verse pinned on this device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PinnedVerse {
    pub verse_key: String,
    pub chapter_number: u32,
    pub verse_number: u32,
    /// Epoch milliseconds. Only used for ordering.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

impl PinnedVerse {
    pub fn new(key: VerseKey, timestamp: i64) -> Self {
        Self {
            verse_key: key.to_string(),
            chapter_number: key.chapter,
            verse_number: key.verse,
            timestamp,
            server_id: None,
        }
    }

    /// Pin `raw` at the current wall-clock time.
    pub fn now(raw: &str) -> Result<Self, VerseKeyError> {
        let key = VerseKey::parse(raw)?;
        Ok(Self::new(key, Utc::now().timestamp_millis()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Ayah,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Ayah => "ayah",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PinnedItemMetadata {
    #[serde(default, alias = "key", skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verse_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_mushaf_id: Option<u32>,
}

/// A pinned item as held by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PinnedItemDto {
    pub id: String,
    pub target_id: String,
    pub target_type: TargetType,
    #[serde(default)]
    pub metadata: Option<PinnedItemMetadata>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub source_mushaf_id: u32,
    /// Chapter number.
    pub key: u32,
    pub verse_number: u32,
}

/// One entry of the batched push to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPinnedItemPayload {
    pub target_type: TargetType,
    pub target_id: String,
    pub metadata: SyncMetadata,
    pub created_at: DateTime<Utc>,
}
