//! `Sagafold` - event-sourced decision core with sagas and projections
//!
//! This library builds event-sourced systems from pure decision functions:
//! deciders turn commands into events, command handlers replay and append
//! with optimistic concurrency, process managers coordinate many entities
//! toward one aggregate outcome, and projection appliers fold recorded
//! events into read-model documents behind a strict version gate.
//!
//! Storage is pluggable through the [`event_log::EventLog`] and
//! [`projection::DocumentStore`] traits; the `sagafold-memory` crate ships
//! in-memory adapters for testing and development.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod decider;
pub mod errors;
pub mod event_log;
pub mod group;
pub mod handler;
pub mod process;
pub mod projection;
pub mod retry;
pub mod router;
pub mod types;

pub use decider::{fold, Decider, FoldedState};
pub use errors::{
    CommandError, CommandHandlerResult, DispatchError, DocumentStoreError, DocumentStoreResult,
    EventLogError, EventLogResult, ProjectionError, ProjectionResult,
};
pub use event_log::{EventLog, EventToWrite, ExpectedVersion, ReadOptions, StoredEvent, StreamData};
pub use handler::CommandHandler;
pub use process::{
    CommandDispatcher, ProcessHandler, ProcessManager, ProcessOutcome, ProcessOutput,
    TargetedCommand,
};
pub use projection::{DocumentStore, Projection, ProjectionApplier, TrackedDocument};
pub use retry::RetryConfig;
pub use router::EventSubscriber;
pub use types::{CurrentVersion, EventId, StreamId, StreamVersion, Timestamp};
