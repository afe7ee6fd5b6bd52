//! The event-log abstraction: an append-only, per-stream ordered sequence of
//! events with conditional append.
//!
//! The log is an external collaborator; this module defines the narrow
//! interface the rest of the crate consumes. The log is the single source of
//! truth: the only place where conditional writes enforce per-stream mutual
//! exclusion.

use crate::errors::EventLogResult;
use crate::types::{CurrentVersion, EventId, StreamId, StreamVersion, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An event as it exists in the log, with its position metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent<E> {
    /// Unique identifier for this event.
    pub event_id: EventId,
    /// The stream this event belongs to.
    pub stream_id: StreamId,
    /// This event's position within its stream (zero-based, contiguous).
    pub version: StreamVersion,
    /// When the event was recorded.
    pub recorded_at: Timestamp,
    /// The event payload.
    pub payload: E,
}

impl<E> StoredEvent<E> {
    /// Creates a stored event.
    pub const fn new(
        event_id: EventId,
        stream_id: StreamId,
        version: StreamVersion,
        recorded_at: Timestamp,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_id,
            version,
            recorded_at,
            payload,
        }
    }
}

/// An event about to be appended.
#[derive(Debug, Clone)]
pub struct EventToWrite<E> {
    /// Unique identifier for the new event (UUIDv7).
    pub event_id: EventId,
    /// The event payload.
    pub payload: E,
}

impl<E> EventToWrite<E> {
    /// Wraps a payload with a fresh event id.
    pub fn new(payload: E) -> Self {
        Self {
            event_id: EventId::new(),
            payload,
        }
    }
}

/// The version condition attached to a conditional append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last event must sit at exactly this version.
    Exact(StreamVersion),
    /// No condition; the append always applies.
    Any,
}

impl ExpectedVersion {
    /// Whether an observed version satisfies this condition.
    #[must_use]
    pub fn matches(self, current: CurrentVersion) -> bool {
        match self {
            Self::NoStream => current.is_no_stream(),
            Self::Exact(version) => current == CurrentVersion::At(version),
            Self::Any => true,
        }
    }
}

impl From<CurrentVersion> for ExpectedVersion {
    fn from(current: CurrentVersion) -> Self {
        match current {
            CurrentVersion::NoStream => Self::NoStream,
            CurrentVersion::At(version) => Self::Exact(version),
        }
    }
}

impl std::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoStream => f.write_str("no stream"),
            Self::Exact(version) => version.fmt(f),
            Self::Any => f.write_str("any"),
        }
    }
}

/// Range configuration for a stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Start reading from this version (inclusive). `None` reads from the
    /// beginning.
    pub from_version: Option<StreamVersion>,
    /// Stop reading at this version (inclusive). `None` reads to the end.
    pub to_version: Option<StreamVersion>,
    /// Maximum number of events to return.
    pub max_events: Option<usize>,
}

impl ReadOptions {
    /// Reads the full stream.
    pub const fn all() -> Self {
        Self {
            from_version: None,
            to_version: None,
            max_events: None,
        }
    }

    /// Sets the starting version.
    #[must_use]
    pub const fn from_version(mut self, version: StreamVersion) -> Self {
        self.from_version = Some(version);
        self
    }

    /// Sets the ending version.
    #[must_use]
    pub const fn to_version(mut self, version: StreamVersion) -> Self {
        self.to_version = Some(version);
        self
    }

    /// Caps the number of returned events.
    #[must_use]
    pub const fn max_events(mut self, max: usize) -> Self {
        self.max_events = Some(max);
        self
    }
}

/// The result of reading a stream: its events plus the version observed,
/// usable as the condition for a later conditional append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamData<E> {
    /// The events read, in stream order.
    pub events: Vec<StoredEvent<E>>,
    /// The stream's version at read time (covers the whole stream, not just
    /// the returned range).
    pub current: CurrentVersion,
}

impl<E> StreamData<E> {
    /// Creates a `StreamData`.
    pub const fn new(events: Vec<StoredEvent<E>>, current: CurrentVersion) -> Self {
        Self { events, current }
    }

    /// An empty read of an absent stream.
    pub const fn absent() -> Self {
        Self {
            events: Vec::new(),
            current: CurrentVersion::NoStream,
        }
    }

    /// Whether the read returned any events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterates over the event payloads in stream order.
    pub fn payloads(&self) -> impl Iterator<Item = &E> + '_ {
        self.events.iter().map(|event| &event.payload)
    }

    /// Turns a read of an absent stream into
    /// [`EventLogError::StreamNotFound`](crate::errors::EventLogError).
    ///
    /// Callers for whom absence is a caller error (any command that cannot
    /// start a stream) gate their read through this; initiating commands
    /// skip it and fold from the initial state.
    ///
    /// # Errors
    ///
    /// Returns `StreamNotFound` when the stream had no events at read time.
    pub fn require_stream(self, stream_id: &StreamId) -> EventLogResult<Self> {
        if self.current.is_no_stream() {
            return Err(crate::errors::EventLogError::StreamNotFound(
                stream_id.clone(),
            ));
        }
        Ok(self)
    }
}

/// The append-only event log, read and written per stream.
///
/// Reads of absent streams return [`StreamData::absent`]; whether absence is
/// an error is decided by the caller (an initiating command tolerates it, any
/// other command treats it as a domain-level problem). Appends are atomic and
/// conditional: either every event in the batch lands, or none do.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// The event payload type this log stores.
    type Event: Send + Sync;

    /// Reads events of one stream in stream order.
    async fn read_stream(
        &self,
        stream_id: &StreamId,
        options: &ReadOptions,
    ) -> EventLogResult<StreamData<Self::Event>>;

    /// Appends `events` to `stream_id` if the stream's version satisfies
    /// `expected`. Returns the version of the last appended event.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::VersionConflict`](crate::errors::EventLogError)
    /// when the condition does not hold at apply time.
    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        events: Vec<EventToWrite<Self::Event>>,
    ) -> EventLogResult<StreamVersion>;

    /// Reads the last event of a stream, if any. Used for checkpoint and
    /// snapshot retrieval.
    async fn read_last(&self, stream_id: &StreamId)
        -> EventLogResult<Option<StoredEvent<Self::Event>>>;

    /// The current version of a stream without reading its events.
    async fn stream_version(&self, stream_id: &StreamId) -> EventLogResult<CurrentVersion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_matching() {
        let at_two = CurrentVersion::At(StreamVersion::new(2));

        assert!(ExpectedVersion::NoStream.matches(CurrentVersion::NoStream));
        assert!(!ExpectedVersion::NoStream.matches(at_two));

        assert!(ExpectedVersion::Exact(StreamVersion::new(2)).matches(at_two));
        assert!(!ExpectedVersion::Exact(StreamVersion::new(1)).matches(at_two));
        assert!(!ExpectedVersion::Exact(StreamVersion::initial()).matches(CurrentVersion::NoStream));

        assert!(ExpectedVersion::Any.matches(CurrentVersion::NoStream));
        assert!(ExpectedVersion::Any.matches(at_two));
    }

    #[test]
    fn expected_version_from_observation() {
        assert_eq!(
            ExpectedVersion::from(CurrentVersion::NoStream),
            ExpectedVersion::NoStream
        );
        assert_eq!(
            ExpectedVersion::from(CurrentVersion::At(StreamVersion::new(3))),
            ExpectedVersion::Exact(StreamVersion::new(3))
        );
    }

    #[test]
    fn read_options_builder() {
        let options = ReadOptions::all()
            .from_version(StreamVersion::new(2))
            .to_version(StreamVersion::new(8))
            .max_events(4);

        assert_eq!(options.from_version, Some(StreamVersion::new(2)));
        assert_eq!(options.to_version, Some(StreamVersion::new(8)));
        assert_eq!(options.max_events, Some(4));
    }

    #[test]
    fn absent_stream_data_is_empty_at_no_stream() {
        let data: StreamData<&str> = StreamData::absent();
        assert!(data.is_empty());
        assert_eq!(data.current, CurrentVersion::NoStream);
    }

    #[test]
    fn require_stream_rejects_absent_streams_only() {
        use crate::errors::EventLogError;
        use crate::types::{EventId, Timestamp};

        let stream_id = StreamId::try_new("cart-9").unwrap();

        let absent: StreamData<&str> = StreamData::absent();
        let err = absent.require_stream(&stream_id).unwrap_err();
        assert!(matches!(err, EventLogError::StreamNotFound(s) if s == stream_id));

        let event = StoredEvent::new(
            EventId::new(),
            stream_id.clone(),
            StreamVersion::initial(),
            Timestamp::now(),
            "opened",
        );
        let data = StreamData::new(vec![event], CurrentVersion::At(StreamVersion::initial()));
        let data = data.require_stream(&stream_id).unwrap();
        assert_eq!(data.events.len(), 1);
    }
}
