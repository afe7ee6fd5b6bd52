//! The decider: one entity's pure command-to-event and event-to-state logic.
//!
//! A decider is the triple `(decide, evolve, initial_state)`. Both functions
//! are pure: no clock, no I/O, no randomness. Anything time-dependent the
//! business logic needs travels inside the command. This keeps replays
//! deterministic and retries safe.

use crate::types::CurrentVersion;

/// One entity's state-transition core.
///
/// Implementations are stateless; all methods are associated functions so a
/// decider is purely a type-level description. Disallowed transitions return
/// the decider's own typed [`Error`](Decider::Error), never a panic and never
/// a stringly-typed catch-all.
pub trait Decider {
    /// Caller intent aimed at one entity instance.
    type Command;
    /// The entity state reconstructed by folding events.
    type State;
    /// The closed set of events this entity produces. `evolve` must be total
    /// over it; events the entity does not care about leave state unchanged.
    type Event;
    /// Typed domain error identifying the violated invariant.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The state of an entity with no recorded events.
    fn initial_state() -> Self::State;

    /// Decides which events a command produces against the current state.
    ///
    /// Must be side-effect-free and total over the declared command/state
    /// domain: every disallowed transition maps to an `Err`, never an
    /// unhandled panic.
    fn decide(command: &Self::Command, state: &Self::State)
        -> Result<Vec<Self::Event>, Self::Error>;

    /// Folds one event into the state.
    fn evolve(state: Self::State, event: &Self::Event) -> Self::State;

    /// Whether `command` may be the first command on a not-yet-existing
    /// stream. Opening/initiating commands override this; for every other
    /// command an absent stream is reported as
    /// [`CommandError::StreamNotFound`](crate::errors::CommandError).
    fn accepts_absent_stream(command: &Self::Command) -> bool {
        let _ = command;
        false
    }
}

/// Folds an event sequence from [`Decider::initial_state`].
pub fn fold<'a, D, I>(events: I) -> D::State
where
    D: Decider,
    D::Event: 'a,
    I: IntoIterator<Item = &'a D::Event>,
{
    events
        .into_iter()
        .fold(D::initial_state(), |state, event| D::evolve(state, event))
}

/// A folded state together with the stream version it was observed at.
///
/// The version is the optimistic-concurrency token for the append that
/// follows the decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldedState<S> {
    /// The reconstructed entity state.
    pub state: S,
    /// The stream version the state reflects.
    pub version: CurrentVersion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use thiserror::Error;

    /// A miniature tally entity used to exercise the contract.
    struct Tally;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TallyCommand {
        Open,
        Add(u32),
        Close,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TallyEvent {
        Opened,
        Added(u32),
        Closed,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct TallyState {
        open: bool,
        closed: bool,
        total: u64,
    }

    #[derive(Debug, Error, PartialEq, Eq)]
    enum TallyError {
        #[error("tally is not open")]
        NotOpen,
        #[error("tally is closed")]
        AlreadyClosed,
    }

    impl Decider for Tally {
        type Command = TallyCommand;
        type State = TallyState;
        type Event = TallyEvent;
        type Error = TallyError;

        fn initial_state() -> TallyState {
            TallyState::default()
        }

        fn decide(command: &TallyCommand, state: &TallyState) -> Result<Vec<TallyEvent>, TallyError> {
            match command {
                TallyCommand::Open if state.open => Ok(vec![]),
                TallyCommand::Open => Ok(vec![TallyEvent::Opened]),
                TallyCommand::Add(_) | TallyCommand::Close if state.closed => {
                    Err(TallyError::AlreadyClosed)
                }
                TallyCommand::Add(_) | TallyCommand::Close if !state.open => {
                    Err(TallyError::NotOpen)
                }
                TallyCommand::Add(n) => Ok(vec![TallyEvent::Added(*n)]),
                TallyCommand::Close => Ok(vec![TallyEvent::Closed]),
            }
        }

        fn evolve(mut state: TallyState, event: &TallyEvent) -> TallyState {
            match event {
                TallyEvent::Opened => state.open = true,
                TallyEvent::Added(n) => state.total += u64::from(*n),
                TallyEvent::Closed => state.closed = true,
            }
            state
        }

        fn accepts_absent_stream(command: &TallyCommand) -> bool {
            matches!(command, TallyCommand::Open)
        }
    }

    fn arbitrary_events() -> impl Strategy<Value = Vec<TallyEvent>> {
        proptest::collection::vec(
            prop_oneof![
                Just(TallyEvent::Opened),
                (0u32..1000).prop_map(TallyEvent::Added),
                Just(TallyEvent::Closed),
            ],
            0..32,
        )
    }

    proptest! {
        #[test]
        fn folding_the_same_events_twice_yields_identical_state(events in arbitrary_events()) {
            let first = fold::<Tally, _>(events.iter());
            let second = fold::<Tally, _>(events.iter());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn decide_is_total_over_commands_and_states(
            events in arbitrary_events(),
            add in 0u32..1000,
        ) {
            let state = fold::<Tally, _>(events.iter());
            // Every declared command either produces events or a typed error.
            for command in [TallyCommand::Open, TallyCommand::Add(add), TallyCommand::Close] {
                let _ = Tally::decide(&command, &state);
            }
        }
    }

    #[test]
    fn fold_of_nothing_is_the_initial_state() {
        let state = fold::<Tally, _>(std::iter::empty());
        assert_eq!(state, Tally::initial_state());
    }

    #[test]
    fn closed_entity_rejects_further_commands_with_typed_error() {
        let state = fold::<Tally, _>([TallyEvent::Opened, TallyEvent::Closed].iter());
        assert_eq!(
            Tally::decide(&TallyCommand::Add(1), &state),
            Err(TallyError::AlreadyClosed)
        );
    }
}
