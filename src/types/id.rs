// ABOUTME: Phantom-typed identifiers for compile-time type safety.
// ABOUTME: Prevents accidental swapping of pipeline run and revision IDs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Marker types for phantom type parameters.
/// Using empty enums prevents instantiation and requires no trait bounds.
pub enum RunMarker {}
pub enum RevisionMarker {}

/// A type-safe identifier that prevents accidental mixing of different ID types.
///
/// Using phantom types, this ensures you can't accidentally pass a `RunId`
/// where a `RevisionId` is expected, catching bugs at compile time.
#[must_use = "IDs reference pipeline records and should not be ignored"]
pub struct Id<T> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(value: String) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_inner(self) -> String {
        self.value
    }
}

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

impl Id<RunMarker> {
    /// Generate a run ID from the current time, process ID and a
    /// process-local counter.
    ///
    /// Sortable by start time; the pid keeps runs on one host apart and the
    /// counter keeps runs started in the same millisecond apart.
    pub fn generate() -> Self {
        let now = chrono::Utc::now();
        let n = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::new(format!(
            "{}-{}-{}",
            now.format("%Y%m%dT%H%M%S%3fZ"),
            std::process::id(),
            n
        ))
    }
}

impl Id<RevisionMarker> {
    /// Revision IDs are sequence numbers within a namespace's history.
    pub fn from_sequence(sequence: u64) -> Self {
        Self::new(format!("r{}", sequence))
    }

    /// The sequence number encoded in this ID, if it was created by
    /// [`Id::from_sequence`].
    pub fn sequence(&self) -> Option<u64> {
        self.value.strip_prefix('r')?.parse().ok()
    }
}

// Manual trait implementations that don't require T to implement the trait.
// This is necessary because T is only used as a phantom type marker.

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Id").field("value", &self.value).finish()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

pub type RunId = Id<RunMarker>;
pub type RevisionId = Id<RevisionMarker>;
