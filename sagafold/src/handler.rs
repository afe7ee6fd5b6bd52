//! The command handler: a generic read-decide-append loop enforcing
//! optimistic concurrency over one stream.
//!
//! Each invocation is an independent unit of work. It reads its full state
//! fresh from the log, decides, and writes back conditionally; no in-memory
//! lock is held across the I/O points, so handlers are safe to run from any
//! number of concurrent workers.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::decider::{fold, Decider, FoldedState};
use crate::errors::{CommandError, CommandHandlerResult};
use crate::event_log::{EventLog, EventToWrite, ReadOptions};
use crate::types::{CurrentVersion, StreamId};

/// Handles commands for one decider over an injected event log.
///
/// The log handle is passed in explicitly at construction; there are no
/// ambient singletons. The handler performs exactly one conditional append
/// per invocation and never retries on conflict: distinguishing a transient
/// client race from a genuine invariant violation is the caller's call.
pub struct CommandHandler<L, D> {
    log: Arc<L>,
    _decider: PhantomData<D>,
}

impl<L, D> Clone for CommandHandler<L, D> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            _decider: PhantomData,
        }
    }
}

impl<L, D> CommandHandler<L, D>
where
    L: EventLog<Event = D::Event>,
    D: Decider,
    D::Event: Send + Sync,
{
    /// Creates a handler over `log`.
    pub fn new(log: Arc<L>) -> Self {
        Self {
            log,
            _decider: PhantomData,
        }
    }

    /// Reads and folds the stream, recording the version the state reflects.
    pub async fn load(
        &self,
        stream_id: &StreamId,
    ) -> CommandHandlerResult<FoldedState<D::State>, D::Error> {
        let data = self
            .log
            .read_stream(stream_id, &ReadOptions::all())
            .await
            .map_err(CommandError::from)?;

        Ok(FoldedState {
            state: fold::<D, _>(data.payloads()),
            version: data.current,
        })
    }

    /// Executes one command against `stream_id`.
    ///
    /// Reads the stream (tolerating absence only for commands that may start
    /// a stream), folds the state, invokes the decider, and appends the
    /// decided events conditioned on the version observed at read time. On
    /// success returns the stream's new version, the caller's
    /// optimistic-concurrency token for its next command.
    ///
    /// # Errors
    ///
    /// - [`CommandError::StreamNotFound`] when the stream is absent and the
    ///   command does not accept absence.
    /// - [`CommandError::Domain`] when the decider rejects the command.
    /// - [`CommandError::ConcurrencyConflict`] when a concurrent writer
    ///   appended between read and append. Not retried here.
    pub async fn execute(
        &self,
        stream_id: &StreamId,
        command: &D::Command,
    ) -> CommandHandlerResult<CurrentVersion, D::Error> {
        let mut data = self
            .log
            .read_stream(stream_id, &ReadOptions::all())
            .await
            .map_err(CommandError::from)?;

        if !D::accepts_absent_stream(command) {
            data = data.require_stream(stream_id).map_err(CommandError::from)?;
        }

        let loaded = FoldedState {
            state: fold::<D, _>(data.payloads()),
            version: data.current,
        };

        let events = D::decide(command, &loaded.state).map_err(CommandError::Domain)?;
        if events.is_empty() {
            debug!(stream = %stream_id, "command decided no events, nothing to append");
            return Ok(loaded.version);
        }

        let batch: Vec<_> = events.into_iter().map(EventToWrite::new).collect();
        let appended = batch.len();
        let new_version = self
            .log
            .append_to_stream(stream_id, loaded.version.into(), batch)
            .await
            .map_err(CommandError::from)?;

        debug!(
            stream = %stream_id,
            events = appended,
            version = %new_version,
            "appended decided events"
        );
        Ok(CurrentVersion::At(new_version))
    }
}
