//! `chapter:verse` keys, the identifier shared by local pins and server items.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

static VERSE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}):(\d{1,3})$").expect("valid verse key regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerseKeyError {
    #[error("malformed verse key '{0}'")]
    Malformed(String),
    #[error("verse key '{0}' must use positive chapter and verse numbers")]
    NotPositive(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VerseKey {
    pub chapter: u32,
    pub verse: u32,
}

impl VerseKey {
    pub fn new(chapter: u32, verse: u32) -> Self {
        Self { chapter, verse }
    }

    pub fn parse(raw: &str) -> Result<Self, VerseKeyError> {
        let trimmed = raw.trim();
        let caps = VERSE_KEY_RE
            .captures(trimmed)
            .ok_or_else(|| VerseKeyError::Malformed(raw.to_string()))?;
        // Both groups are 1-3 ASCII digits, so they always fit in u32.
        let chapter: u32 = caps[1]
            .parse()
            .map_err(|_| VerseKeyError::Malformed(raw.to_string()))?;
        let verse: u32 = caps[2]
            .parse()
            .map_err(|_| VerseKeyError::Malformed(raw.to_string()))?;
        if chapter == 0 || verse == 0 {
            return Err(VerseKeyError::NotPositive(raw.to_string()));
        }
        Ok(Self { chapter, verse })
    }
}

impl fmt::Display for VerseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chapter, self.verse)
    }
}

impl FromStr for VerseKey {
    type Err = VerseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
