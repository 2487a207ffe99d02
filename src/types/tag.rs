// ABOUTME: Image tag validation and ref-based tag derivation.
// ABOUTME: Branch builds use the short SHA, pull requests use pr-{number}-{sha}.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

const SHORT_SHA_LEN: usize = 7;
const MAX_TAG_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("image tag cannot be empty")]
    Empty,

    #[error("image tag exceeds maximum length of 128 characters")]
    TooLong,

    #[error("image tag cannot start with '{0}'")]
    InvalidStart(char),

    #[error("invalid character in image tag: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageTag(String);

impl ImageTag {
    pub fn new(value: &str) -> Result<Self, TagError> {
        let first = value.chars().next().ok_or(TagError::Empty)?;

        if value.len() > MAX_TAG_LEN {
            return Err(TagError::TooLong);
        }

        if first == '.' || first == '-' {
            return Err(TagError::InvalidStart(first));
        }

        for c in value.chars() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '.' && c != '-' {
                return Err(TagError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    /// Tag for branch and manual builds: the short commit SHA.
    pub fn for_branch(sha: &str) -> Result<Self, TagError> {
        Self::new(short_sha(sha))
    }

    /// Tag for pull request builds: `pr-{number}-{sha}`.
    pub fn for_pull_request(number: u64, sha: &str) -> Result<Self, TagError> {
        Self::new(&format!("pr-{}-{}", number, sha.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// First seven characters of a commit SHA (or the whole SHA if shorter).
pub fn short_sha(sha: &str) -> &str {
    let sha = sha.trim();
    match sha.char_indices().nth(SHORT_SHA_LEN) {
        Some((idx, _)) => &sha[..idx],
        None => sha,
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ImageTag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for ImageTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ImageTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ImageTag::new(&s).map_err(serde::de::Error::custom)
    }
}
