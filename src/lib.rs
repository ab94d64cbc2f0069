//! Keeps a user's pinned Quran verses reconciled between this device and the
//! server.

pub mod api;
pub mod config;
pub mod db;
pub mod gate;
pub mod merge;
pub mod model;
pub mod report;
pub mod store;
pub mod sync;
pub mod verse_key;
