use serde::{Deserialize, Serialize};

use crate::model::{PinnedItemDto, SyncPinnedItemPayload};

/// Envelope of `GET v1/pinned-items`.
#[derive(Deserialize, Debug)]
pub struct PinnedItemsResp {
    #[serde(default)]
    pub data: Vec<PinnedItemDto>,
}

/// Body of `POST v1/pinned-items/sync`.
#[derive(Serialize, Debug)]
pub struct SyncPinnedItemsReq<'a> {
    pub items: &'a [SyncPinnedItemPayload],
}
