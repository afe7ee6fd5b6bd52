//! Error types for every subsystem.
//!
//! Each layer has its own error enum so callers can tell recoverable
//! rejections apart from system faults:
//!
//! - [`EventLogError`]: storage-layer failures, including version conflicts.
//! - [`CommandError`]: command-handling failures; generic over the decider's
//!   typed domain error so invariant violations stay typed end to end.
//! - [`DocumentStoreError`]: read-model store failures.
//! - [`ProjectionError`]: projection application failures, including the
//!   bounded-retry exhaustion case.
//!
//! Conversions between layers go through `From`: a storage-level
//! `VersionConflict` surfaces to command callers as `ConcurrencyConflict`,
//! everything else stays wrapped.

use crate::event_log::ExpectedVersion;
use crate::types::{CurrentVersion, StreamId, StreamVersion};
use thiserror::Error;

/// Errors raised by an [`EventLog`](crate::event_log::EventLog)
/// implementation.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The requested stream has no events.
    #[error("stream '{0}' not found")]
    StreamNotFound(StreamId),

    /// A conditional append lost the race against a concurrent writer.
    #[error("version conflict on stream '{stream}': expected {expected}, but current is {actual}")]
    VersionConflict {
        /// The stream with the conflicting append.
        stream: StreamId,
        /// The version condition the writer supplied.
        expected: ExpectedVersion,
        /// The version the stream actually sat at.
        actual: CurrentVersion,
    },

    /// An I/O error in the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An unexpected fault inside the log implementation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors raised when handling a command against one stream.
///
/// Generic over `E`, the decider's own domain error type, so "the command is
/// invalid for the current state" keeps its precise meaning at the call site.
#[derive(Debug, Error)]
pub enum CommandError<E>
where
    E: std::error::Error,
{
    /// The decider rejected the command for the current entity state.
    /// Recoverable by the caller; never a system fault.
    #[error("domain rule rejected the command: {0}")]
    Domain(#[source] E),

    /// A concurrent writer appended first; re-read and retry if desired.
    /// The handler itself never retries.
    #[error("concurrency conflict on stream '{stream}': expected {expected}, actual {actual}")]
    ConcurrencyConflict {
        /// The contested stream.
        stream: StreamId,
        /// The version observed at read time.
        expected: ExpectedVersion,
        /// The version found at append time.
        actual: CurrentVersion,
    },

    /// The command requires an existing stream, but none was found.
    #[error("stream '{0}' not found")]
    StreamNotFound(StreamId),

    /// Any other event-log failure.
    #[error("event log error: {0}")]
    EventLog(EventLogError),
}

impl<E> From<EventLogError> for CommandError<E>
where
    E: std::error::Error,
{
    fn from(err: EventLogError) -> Self {
        match err {
            EventLogError::VersionConflict {
                stream,
                expected,
                actual,
            } => Self::ConcurrencyConflict {
                stream,
                expected,
                actual,
            },
            EventLogError::StreamNotFound(stream) => Self::StreamNotFound(stream),
            other => Self::EventLog(other),
        }
    }
}

/// Errors raised by a [`DocumentStore`](crate::projection::DocumentStore).
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    /// A conditional write found the document at a different position than
    /// the writer expected.
    #[error(
        "position conflict on document '{id}': expected position {expected}, actual {actual}"
    )]
    PositionConflict {
        /// The contested document.
        id: String,
        /// The prior position the writer conditioned on.
        expected: CurrentVersion,
        /// The position the document actually sat at.
        actual: CurrentVersion,
    },

    /// An unexpected fault inside the store implementation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors raised while applying events to a read-model document.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The document could not be advanced within the retry budget. Fatal for
    /// this event; the document is left untouched.
    #[error(
        "projection stalled on document '{document}' at position {position} after {attempts} attempts"
    )]
    Stalled {
        /// The document that could not be advanced.
        document: String,
        /// The event position that never became applicable.
        position: StreamVersion,
        /// How many fetch-check-write cycles were spent.
        attempts: u32,
    },

    /// The document store failed for a reason other than a position race.
    #[error("document store error: {0}")]
    DocumentStore(#[from] DocumentStoreError),
}

/// Errors raised while dispatching a process-emitted command.
#[derive(Debug, Error)]
#[error("dispatch to stream '{target}' failed: {reason}")]
pub struct DispatchError {
    /// The stream the command was addressed to.
    pub target: StreamId,
    /// Why the dispatch failed.
    pub reason: String,
}

impl DispatchError {
    /// Creates a dispatch error for `target`.
    pub fn new(target: StreamId, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
        }
    }
}

/// Result alias for event-log operations.
pub type EventLogResult<T> = Result<T, EventLogError>;

/// Result alias for command handling, parameterised by the decider's domain
/// error.
pub type CommandHandlerResult<T, E> = Result<T, CommandError<E>>;

/// Result alias for document-store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

/// Result alias for projection application.
pub type ProjectionResult<T> = Result<T, ProjectionError>;
