//! Core identifier and version types.
//!
//! All identifier types use smart constructors so that an instance, once
//! constructed, is valid everywhere it travels. Versions are plain ordered
//! newtypes; the "no stream yet" case is modelled separately by
//! [`CurrentVersion`] rather than by a magic number.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one event stream (one entity instance).
///
/// Guaranteed non-empty and at most 255 characters, trimmed on construction.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamId(String);

/// Globally unique event identifier, always UUIDv7.
///
/// UUIDv7 gives time-ordered sort behaviour, which the in-memory log relies
/// on when merging events for delivery.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a fresh `EventId` stamped with the current time.
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() always returns a valid v7 UUID")
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// The position of an event within its stream.
///
/// Versions are contiguous and zero-based: the first event of a stream is at
/// version 0. "No events yet" is not a version; see [`CurrentVersion`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StreamVersion(u64);

impl StreamVersion {
    /// The version the first event of a stream receives.
    pub const fn initial() -> Self {
        Self(0)
    }

    /// Constructs a version from its numeric value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the version directly after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The numeric value of this version.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<StreamVersion> for u64 {
    fn from(version: StreamVersion) -> Self {
        version.0
    }
}

impl std::fmt::Display for StreamVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The version of a stream as observed at read time.
///
/// `NoStream` is the sentinel before the first event; afterwards the stream
/// sits at the version of its last event. The `Ord` derive places `NoStream`
/// below every concrete version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum CurrentVersion {
    /// The stream has no events yet.
    NoStream,
    /// The stream's last event sits at this version.
    At(StreamVersion),
}

impl CurrentVersion {
    /// The version the next appended event would receive.
    #[must_use]
    pub const fn next(self) -> StreamVersion {
        match self {
            Self::NoStream => StreamVersion::initial(),
            Self::At(version) => version.next(),
        }
    }

    /// Whether this observation already covers `version`.
    #[must_use]
    pub fn has_seen(self, version: StreamVersion) -> bool {
        matches!(self, Self::At(seen) if seen >= version)
    }

    /// Whether the stream had no events at observation time.
    #[must_use]
    pub const fn is_no_stream(self) -> bool {
        matches!(self, Self::NoStream)
    }
}

impl From<StreamVersion> for CurrentVersion {
    fn from(version: StreamVersion) -> Self {
        Self::At(version)
    }
}

impl std::fmt::Display for CurrentVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoStream => f.write_str("no stream"),
            Self::At(version) => version.fmt(f),
        }
    }
}

/// When an event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Wraps a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// The current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// The underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
