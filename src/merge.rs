//! Conversion between server items and local pins, and the reconciliation of
//! both lists.
//!
//! The server is authoritative for which pins exist and what their ids are;
//! the local list is authoritative for the order the user pinned them in.
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

use crate::model::{PinnedItemDto, PinnedVerse, SyncMetadata, SyncPinnedItemPayload, TargetType};
use crate::verse_key::{VerseKey, VerseKeyError};

/// Canonical `chapter:verse` spelling of `raw`, so `"02:255"` and `"2:255"`
/// compare equal. `None` when `raw` is not a verse key.
fn canonical_key(raw: &str) -> Option<String> {
    VerseKey::parse(raw).ok().map(|k| k.to_string())
}

fn local_key(verse: &PinnedVerse) -> String {
    canonical_key(&verse.verse_key).unwrap_or_else(|| verse.verse_key.clone())
}

pub fn server_item_to_local(item: &PinnedItemDto) -> Result<PinnedVerse, VerseKeyError> {
    let parsed = VerseKey::parse(&item.target_id)?;
    let meta = item.metadata.as_ref();
    let chapter_number = meta
        .and_then(|m| m.chapter_number)
        .unwrap_or(parsed.chapter);
    let verse_number = meta.and_then(|m| m.verse_number).unwrap_or(parsed.verse);
    Ok(PinnedVerse {
        verse_key: parsed.to_string(),
        chapter_number,
        verse_number,
        timestamp: item.created_at.timestamp_millis(),
        server_id: Some(item.id.clone()),
    })
}

pub fn local_to_sync_payload(verse: &PinnedVerse, mushaf_id: u32) -> SyncPinnedItemPayload {
    let created_at = match DateTime::<Utc>::from_timestamp_millis(verse.timestamp) {
        Some(at) => at,
        None => {
            warn!(
                verse_key = %verse.verse_key,
                timestamp = verse.timestamp,
                "local pin timestamp out of range; sending epoch"
            );
            DateTime::<Utc>::default()
        }
    };
    SyncPinnedItemPayload {
        target_type: TargetType::Ayah,
        target_id: verse.verse_key.clone(),
        metadata: SyncMetadata {
            source_mushaf_id: mushaf_id,
            key: verse.chapter_number,
            verse_number: verse.verse_number,
        },
        created_at,
    }
}

/// Merge the server snapshot with the local list.
///
/// Server items keep their server id but take the local timestamp when the
/// same key is pinned locally. Local pins unknown to the server are appended
/// as they are. The result is sorted ascending by timestamp and holds each
/// verse key at most once.
pub fn merge_pinned_verses(
    server_items: &[PinnedItemDto],
    local_pinned: &[PinnedVerse],
) -> Vec<PinnedVerse> {
    let local_by_key: HashMap<String, &PinnedVerse> =
        local_pinned.iter().map(|v| (local_key(v), v)).collect();

    let mut seen: HashSet<String> = HashSet::with_capacity(server_items.len());
    let mut merged = Vec::with_capacity(server_items.len() + local_pinned.len());

    for item in server_items {
        let mut verse = match server_item_to_local(item) {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, id = %item.id, "skipping server pin with malformed target id");
                continue;
            }
        };
        if !seen.insert(verse.verse_key.clone()) {
            continue;
        }
        if let Some(local) = local_by_key.get(&verse.verse_key) {
            verse.timestamp = local.timestamp;
        }
        merged.push(verse);
    }

    for local in local_pinned {
        if seen.insert(local_key(local)) {
            merged.push(local.clone());
        }
    }

    merged.sort_by_key(|v| v.timestamp);
    merged
}

/// Local pins the server does not know about yet.
pub fn local_only_items<'a>(
    server_items: &[PinnedItemDto],
    local_pinned: &'a [PinnedVerse],
) -> Vec<&'a PinnedVerse> {
    let server_keys: HashSet<String> = server_items
        .iter()
        .filter_map(|i| canonical_key(&i.target_id))
        .collect();
    local_pinned
        .iter()
        .filter(|v| !server_keys.contains(&local_key(v)))
        .collect()
}

/// `verse_key -> server id` for every well-formed server item, keyed by the
/// canonical key.
pub fn server_id_map(server_items: &[PinnedItemDto]) -> BTreeMap<String, String> {
    let mut ids = BTreeMap::new();
    for item in server_items {
        let Some(key) = canonical_key(&item.target_id) else {
            continue;
        };
        ids.entry(key).or_insert_with(|| item.id.clone());
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PinnedItemMetadata;

    fn dto(id: &str, target: &str, created_at: &str) -> PinnedItemDto {
        PinnedItemDto {
            id: id.into(),
            target_id: target.into(),
            target_type: TargetType::Ayah,
            metadata: None,
            created_at: created_at.parse().unwrap(),
        }
    }

    fn local(key: &str, ts: i64) -> PinnedVerse {
        PinnedVerse::new(VerseKey::parse(key).unwrap(), ts)
    }

    fn keys(list: &[PinnedVerse]) -> Vec<&str> {
        list.iter().map(|v| v.verse_key.as_str()).collect()
    }

    #[test]
    fn server_item_uses_metadata_numbers_when_present() {
        let mut item = dto("s1", "2:255", "2024-01-01T00:00:00Z");
        item.metadata = Some(PinnedItemMetadata {
            chapter_number: Some(2),
            verse_number: Some(255),
            source_mushaf_id: Some(1),
        });
        let v = server_item_to_local(&item).unwrap();
        assert_eq!((v.chapter_number, v.verse_number), (2, 255));
        assert_eq!(v.server_id.as_deref(), Some("s1"));
        assert_eq!(v.timestamp, 1_704_067_200_000);
    }

    #[test]
    fn server_item_falls_back_to_target_id() {
        let v = server_item_to_local(&dto("s9", "18:10", "2024-01-01T00:00:00Z")).unwrap();
        assert_eq!((v.chapter_number, v.verse_number), (18, 10));
    }

    #[test]
    fn server_item_rejects_malformed_target() {
        assert!(server_item_to_local(&dto("x", "oops", "2024-01-01T00:00:00Z")).is_err());
    }

    #[test]
    fn payload_carries_mushaf_and_created_at() {
        let p = local_to_sync_payload(&local("36:1", 1_704_067_200_000), 7);
        assert_eq!(p.target_type, TargetType::Ayah);
        assert_eq!(p.target_id, "36:1");
        assert_eq!(
            p.metadata,
            SyncMetadata {
                source_mushaf_id: 7,
                key: 36,
                verse_number: 1
            }
        );
        assert_eq!(p.created_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn clean_merge_keeps_server_and_local_only() {
        let server = vec![dto("s1", "2:255", "2024-01-01T00:00:00Z")];
        let locals = vec![local("1:1", 500)];
        let merged = merge_pinned_verses(&server, &locals);
        assert_eq!(keys(&merged), vec!["1:1", "2:255"]);
        assert_eq!(merged[1].server_id.as_deref(), Some("s1"));
        assert_eq!(merged[0].server_id, None);
    }

    #[test]
    fn shared_key_takes_local_timestamp_and_server_id() {
        let server = vec![dto("s1", "2:255", "2024-01-01T00:00:00Z")];
        let locals = vec![local("2:255", 42)];
        let merged = merge_pinned_verses(&server, &locals);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].timestamp, 42);
        assert_eq!(merged[0].server_id.as_deref(), Some("s1"));
    }

    #[test]
    fn output_is_sorted_and_unique() {
        let server = vec![
            dto("s1", "3:3", "2024-03-01T00:00:00Z"),
            dto("s2", "1:7", "2024-01-01T00:00:00Z"),
            dto("s3", "3:3", "2024-02-01T00:00:00Z"),
        ];
        let locals = vec![local("9:9", 2_000_000_000_000), local("1:7", 10), local("5:5", 3)];
        let merged = merge_pinned_verses(&server, &locals);
        assert_eq!(keys(&merged), vec!["5:5", "1:7", "3:3", "9:9"]);
        assert!(merged.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(merged[2].server_id.as_deref(), Some("s1"));
    }

    #[test]
    fn merge_is_idempotent_for_a_fixed_snapshot() {
        let server = vec![
            dto("s1", "2:255", "2024-01-01T00:00:00Z"),
            dto("s2", "112:1", "2024-01-02T00:00:00Z"),
        ];
        let locals = vec![local("1:1", 500), local("112:1", 900)];
        let once = merge_pinned_verses(&server, &locals);
        let twice = merge_pinned_verses(&server, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn malformed_server_items_are_skipped() {
        let server = vec![
            dto("bad", "not-a-key", "2024-01-01T00:00:00Z"),
            dto("s1", "1:2", "2024-01-01T00:00:00Z"),
        ];
        let merged = merge_pinned_verses(&server, &[]);
        assert_eq!(keys(&merged), vec!["1:2"]);
    }

    #[test]
    fn empty_inputs() {
        assert!(merge_pinned_verses(&[], &[]).is_empty());
        let locals = vec![local("4:4", 1)];
        assert_eq!(merge_pinned_verses(&[], &locals), locals);
    }

    #[test]
    fn local_only_and_id_map() {
        let server = vec![
            dto("s1", "2:255", "2024-01-01T00:00:00Z"),
            dto("s2", "1:1", "2024-01-01T00:00:00Z"),
        ];
        let locals = vec![local("1:1", 1), local("67:1", 2)];
        let only: Vec<&str> = local_only_items(&server, &locals)
            .into_iter()
            .map(|v| v.verse_key.as_str())
            .collect();
        assert_eq!(only, vec!["67:1"]);

        let ids = server_id_map(&server);
        assert_eq!(ids.get("2:255").map(String::as_str), Some("s1"));
        assert_eq!(ids.get("1:1").map(String::as_str), Some("s2"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn non_canonical_server_key_matches_local_pin() {
        let server = vec![dto("s1", "02:255", "2024-01-01T00:00:00Z")];
        let locals = vec![local("2:255", 5)];

        let merged = merge_pinned_verses(&server, &locals);
        assert_eq!(keys(&merged), vec!["2:255"]);
        assert_eq!(merged[0].timestamp, 5);
        assert_eq!(merged[0].server_id.as_deref(), Some("s1"));

        assert!(local_only_items(&server, &locals).is_empty());
        let ids = server_id_map(&server);
        assert_eq!(ids.get("2:255").map(String::as_str), Some("s1"));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn padded_duplicates_collapse_to_first_server_item() {
        let server = vec![
            dto("s1", " 7:1", "2024-01-01T00:00:00Z"),
            dto("s2", "007:001", "2024-01-02T00:00:00Z"),
        ];
        let merged = merge_pinned_verses(&server, &[]);
        assert_eq!(keys(&merged), vec!["7:1"]);
        assert_eq!(merged[0].server_id.as_deref(), Some("s1"));
    }

    #[test]
    fn out_of_range_timestamp_is_sent_as_epoch() {
        let p = local_to_sync_payload(&local("1:1", i64::MAX), 1);
        assert_eq!(p.created_at, DateTime::<Utc>::default());
        assert_eq!(p.target_id, "1:1");
    }
}
