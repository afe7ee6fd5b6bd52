//! The process manager: a stateful, event-sourced reducer coordinating many
//! independent entities toward one aggregate outcome.
//!
//! A process manager is a pure function `(state, input) -> (events,
//! commands)` plus its own `evolve`. The runtime persists the new state by
//! appending the emitted events to the process's own stream (optimistic
//! concurrency included) and hands the emitted commands to an explicit
//! [`CommandDispatcher`] outbox. Whether those commands are executed directly
//! (orchestration) or published for an external router to pick up
//! (choreography) is purely a dispatcher concern: the decision logic is
//! transport-agnostic and shared unchanged.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{CommandError, CommandHandlerResult, DispatchError};
use crate::event_log::{EventLog, EventToWrite, ReadOptions};
use crate::types::{CurrentVersion, StreamId, StreamVersion};

/// A command aimed at a specific target stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetedCommand<C> {
    /// The stream of the entity the command addresses.
    pub target: StreamId,
    /// The command payload.
    pub command: C,
}

impl<C> TargetedCommand<C> {
    /// Creates a targeted command.
    pub const fn new(target: StreamId, command: C) -> Self {
        Self { target, command }
    }
}

/// The pure result of one process reaction: events for the process's own
/// stream and commands for other entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput<E, C> {
    /// Domain events of the process itself, to be appended to its stream.
    pub events: Vec<E>,
    /// Follow-on commands for other entities, to be handed to the outbox.
    pub commands: Vec<TargetedCommand<C>>,
}

impl<E, C> ProcessOutput<E, C> {
    /// A reaction that changes nothing and commands nothing.
    pub const fn none() -> Self {
        Self {
            events: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// A reaction that only records events.
    pub const fn events(events: Vec<E>) -> Self {
        Self {
            events,
            commands: Vec::new(),
        }
    }

    /// A reaction with both events and fan-out commands.
    pub const fn with_commands(events: Vec<E>, commands: Vec<TargetedCommand<C>>) -> Self {
        Self { events, commands }
    }

    /// Whether this reaction is a no-op.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.commands.is_empty()
    }
}

impl<E, C> Default for ProcessOutput<E, C> {
    fn default() -> Self {
        Self::none()
    }
}

/// The pure decision core of a process manager.
///
/// Like a [`Decider`](crate::decider::Decider), implementations are
/// stateless type-level descriptions; `react` and `evolve` are pure and
/// total. Inputs the process does not recognise in its current phase produce
/// [`ProcessOutput::none`], which makes redelivery harmless.
pub trait ProcessManager {
    /// Incoming messages: the initiating command and the events of the
    /// entities the process observes.
    type Input;
    /// The process's own domain events.
    type Event;
    /// Commands the process emits toward other entities.
    type Command;
    /// The process state reconstructed by folding its own events.
    type State;
    /// Typed error for inputs that are invalid rather than merely stale.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The state of a process with no recorded events.
    fn initial_state() -> Self::State;

    /// Reacts to one input: decides which events to record and which
    /// commands to emit. Pure; duplicates and late arrivals must map to an
    /// empty output, not an error.
    fn react(
        state: &Self::State,
        input: &Self::Input,
    ) -> Result<ProcessOutput<Self::Event, Self::Command>, Self::Error>;

    /// Folds one of the process's own events into its state. Total; events
    /// that no longer apply (e.g. anything after the terminal phase) leave
    /// the state unchanged.
    fn evolve(state: Self::State, event: &Self::Event) -> Self::State;
}

/// The outbox seam between a process manager and the rest of the system.
///
/// An orchestrating dispatcher routes each command straight into the target
/// entity's command handler; a choreographing one publishes it for an
/// external router. Either way the process's decision logic never changes.
#[async_trait::async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// The command payload type this dispatcher carries.
    type Command: Send + Sync;

    /// Delivers one command to its target.
    async fn dispatch(&self, target: &StreamId, command: &Self::Command)
        -> Result<(), DispatchError>;
}

/// What one process-manager invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The reaction recorded events; the process stream now sits at this
    /// version.
    Applied {
        /// Version of the last appended process event.
        version: StreamVersion,
    },
    /// The input was recognised but changed nothing (duplicate delivery,
    /// late arrival, re-initiation). Safe under at-least-once delivery.
    Ignored,
}

/// Runs a process manager over its own event stream.
///
/// Each invocation folds the process's stream fresh, reacts, conditionally
/// appends the emitted events, and only then hands the emitted commands to
/// the dispatcher, so commands are never sent for a decision that lost its
/// append race.
pub struct ProcessHandler<L, P, T>
where
    T: CommandDispatcher,
{
    log: Arc<L>,
    dispatcher: Arc<T>,
    _process: PhantomData<P>,
}

impl<L, P, T> ProcessHandler<L, P, T>
where
    L: EventLog<Event = P::Event>,
    P: ProcessManager,
    P::Event: Send + Sync,
    T: CommandDispatcher<Command = P::Command>,
{
    /// Creates a handler over `log`, sending emitted commands to
    /// `dispatcher`.
    pub fn new(log: Arc<L>, dispatcher: Arc<T>) -> Self {
        Self {
            log,
            dispatcher,
            _process: PhantomData,
        }
    }

    /// Applies one input to the process identified by `process_stream`.
    ///
    /// Absence of the process stream is never an error here: the initiating
    /// input creates it, and stale member events against a non-existent
    /// process fold into the initial state and react to nothing.
    ///
    /// A dispatch failure for one command is logged and does not abort the
    /// remaining commands; the append has already made the decision durable.
    ///
    /// # Errors
    ///
    /// - [`CommandError::Domain`] when the input is invalid for the process.
    /// - [`CommandError::ConcurrencyConflict`] when another worker advanced
    ///   the process stream first; redelivery will re-run the reaction
    ///   against the fresh state.
    pub async fn handle(
        &self,
        process_stream: &StreamId,
        input: &P::Input,
    ) -> CommandHandlerResult<ProcessOutcome, P::Error> {
        let data = self
            .log
            .read_stream(process_stream, &ReadOptions::all())
            .await
            .map_err(CommandError::from)?;

        let state = data
            .payloads()
            .fold(P::initial_state(), |state, event| P::evolve(state, event));

        let output = P::react(&state, input).map_err(CommandError::Domain)?;
        if output.is_empty() {
            debug!(process = %process_stream, "input produced no reaction");
            return Ok(ProcessOutcome::Ignored);
        }

        let batch: Vec<_> = output.events.into_iter().map(EventToWrite::new).collect();
        let version = if batch.is_empty() {
            match data.current {
                CurrentVersion::At(version) => version,
                CurrentVersion::NoStream => {
                    // A reaction that only emits commands from a process with
                    // no history has nothing to anchor redelivery on; record
                    // keeping is the process's own responsibility.
                    warn!(process = %process_stream, "commands emitted without process events");
                    StreamVersion::initial()
                }
            }
        } else {
            self.log
                .append_to_stream(process_stream, data.current.into(), batch)
                .await
                .map_err(CommandError::from)?
        };

        for TargetedCommand { target, command } in &output.commands {
            if let Err(err) = self.dispatcher.dispatch(target, command).await {
                // Isolated per target: one member's dispatch failure must not
                // starve the others. The member-level retry is its own concern.
                warn!(process = %process_stream, target = %target, error = %err, "command dispatch failed");
            }
        }

        debug!(process = %process_stream, version = %version, "process reaction applied");
        Ok(ProcessOutcome::Applied { version })
    }
}
