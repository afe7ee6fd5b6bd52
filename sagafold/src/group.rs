//! The group checkout process: coordinates an unbounded set of independently
//! event-sourced member entities toward exactly one aggregate outcome.
//!
//! The process tracks a per-member status map rather than a counter so the
//! transition that closes the *last* open member can be detected regardless
//! of the order member outcomes arrive in. Once a member is closed its entry
//! is never overwritten, and once the process is finished every further input
//! is absorbed; both guards live in `react` *and* `evolve`, so redelivered
//! events are harmless to the reaction and to the persisted fold alike.

use std::collections::BTreeMap;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::{ProcessManager, ProcessOutput, TargetedCommand};
use crate::types::{StreamId, Timestamp};

/// Identifies one member of a group process.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
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
pub struct MemberId(String);

/// The stream of the entity backing one member.
///
/// Fan-out commands are addressed here; the member id is at most 200
/// characters, so the prefixed stream id always fits.
pub fn member_stream_id(member: &MemberId) -> StreamId {
    StreamId::try_new(format!("member-{member}")).expect("prefixed member id fits a stream id")
}

/// Where one member stands within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    /// The member action has been scheduled but not acknowledged.
    Pending,
    /// The member acknowledged the action and is working on it.
    Initiated,
    /// The member action succeeded. Closed.
    Completed,
    /// The member action failed. Closed.
    Failed,
}

impl MemberStatus {
    /// Whether this status is final. A closed entry is never overwritten.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The final outcome of one member action, as recorded in the process stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberOutcome {
    /// The member action succeeded.
    Completed,
    /// The member action failed; the reason travels with the record.
    Failed {
        /// Why the member action failed.
        reason: String,
    },
}

impl MemberOutcome {
    const fn status(&self) -> MemberStatus {
        match self {
            Self::Completed => MemberStatus::Completed,
            Self::Failed { .. } => MemberStatus::Failed,
        }
    }
}

/// Process phases. Transitions only ever run
/// `NotStarted -> Initiated -> Finished`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupProcessState {
    /// No initiation recorded yet.
    NotStarted,
    /// The roster is fixed and members are being worked off.
    Initiated {
        /// Status per roster member. Keys are the full roster; entries only
        /// move forward and never leave the map.
        members: BTreeMap<MemberId, MemberStatus>,
    },
    /// A final outcome was recorded. Absorbs all further inputs.
    Finished,
}

/// Inputs the process reacts to: the initiating command plus the member
/// events routed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupProcessInput {
    /// Start the process for a roster of members.
    Initiate {
        /// The members to coordinate. Duplicates are collapsed.
        members: Vec<MemberId>,
        /// Who asked for the group action.
        initiated_by: String,
        /// When the initiation was requested (passed in, never read from a
        /// clock inside the process).
        at: Timestamp,
    },
    /// A member acknowledged the fan-out command and started working.
    MemberStarted {
        /// The acknowledging member.
        member: MemberId,
        /// When the member started.
        at: Timestamp,
    },
    /// A member finished its action successfully.
    MemberSucceeded {
        /// The successful member.
        member: MemberId,
        /// When the member finished.
        at: Timestamp,
    },
    /// A member's action failed. Not a process failure by itself; it is
    /// recorded and folded into the final aggregate decision.
    MemberFailed {
        /// The failing member.
        member: MemberId,
        /// Why the member action failed.
        reason: String,
        /// When the failure was observed.
        at: Timestamp,
    },
}

/// The process's own events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupProcessEvent {
    /// The process started with this roster, all members pending.
    Initiated {
        /// The deduplicated roster.
        members: Vec<MemberId>,
        /// Who asked for the group action.
        initiated_by: String,
        /// When the process was initiated.
        at: Timestamp,
    },
    /// A member moved from pending to working.
    MemberStarted {
        /// The acknowledging member.
        member: MemberId,
        /// When the member started.
        at: Timestamp,
    },
    /// A member closed with the given outcome.
    MemberOutcomeRecorded {
        /// The member that closed.
        member: MemberId,
        /// How it closed.
        outcome: MemberOutcome,
        /// When the outcome was observed.
        at: Timestamp,
    },
    /// Every member completed; the process is done.
    Completed {
        /// All roster members, in roster order.
        completed: Vec<MemberId>,
        /// When the last member closed.
        at: Timestamp,
    },
    /// Every member closed but at least one failed.
    Failed {
        /// Members that completed.
        completed: Vec<MemberId>,
        /// Members that failed.
        failed: Vec<MemberId>,
        /// When the last member closed.
        at: Timestamp,
    },
}

/// Commands fanned out to member entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupMemberCommand {
    /// Perform the member's part of the group action.
    PerformAction {
        /// The member being asked.
        member: MemberId,
        /// When the group action was initiated.
        at: Timestamp,
    },
}

/// Invalid inputs to the group process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupProcessError {
    /// `Initiate` named nobody; a process with an empty roster would
    /// finalize vacuously.
    #[error("cannot initiate a group process with an empty member roster")]
    EmptyRoster,
}

/// The group checkout process manager.
pub struct GroupProcess;

type GroupOutput = ProcessOutput<GroupProcessEvent, GroupMemberCommand>;

impl GroupProcess {
    fn initiate(
        members: &[MemberId],
        initiated_by: &str,
        at: Timestamp,
    ) -> Result<GroupOutput, GroupProcessError> {
        let mut roster: Vec<MemberId> = Vec::with_capacity(members.len());
        for member in members {
            if !roster.contains(member) {
                roster.push(member.clone());
            }
        }
        if roster.is_empty() {
            return Err(GroupProcessError::EmptyRoster);
        }

        let commands = roster
            .iter()
            .map(|member| {
                TargetedCommand::new(
                    member_stream_id(member),
                    GroupMemberCommand::PerformAction {
                        member: member.clone(),
                        at,
                    },
                )
            })
            .collect();

        let events = vec![GroupProcessEvent::Initiated {
            members: roster,
            initiated_by: initiated_by.to_string(),
            at,
        }];

        Ok(ProcessOutput::with_commands(events, commands))
    }

    /// Records a member outcome and, when it closes the last open member,
    /// emits the single finalization event in the same batch.
    fn close_member(
        members: &BTreeMap<MemberId, MemberStatus>,
        member: &MemberId,
        outcome: MemberOutcome,
        at: Timestamp,
    ) -> GroupOutput {
        let Some(status) = members.get(member) else {
            // Not on this process's roster.
            return ProcessOutput::none();
        };
        if status.is_closed() {
            // Duplicate delivery of an outcome already recorded.
            return ProcessOutput::none();
        }

        let closing = outcome.status();
        let mut events = vec![GroupProcessEvent::MemberOutcomeRecorded {
            member: member.clone(),
            outcome,
            at,
        }];

        let all_closed = members
            .iter()
            .all(|(id, status)| id == member || status.is_closed());
        if all_closed {
            let verdict = |id: &MemberId, status: MemberStatus| {
                if id == member {
                    closing
                } else {
                    status
                }
            };
            let completed: Vec<MemberId> = members
                .iter()
                .filter(|&(id, &status)| verdict(id, status) == MemberStatus::Completed)
                .map(|(id, _)| id.clone())
                .collect();
            let failed: Vec<MemberId> = members
                .iter()
                .filter(|&(id, &status)| verdict(id, status) == MemberStatus::Failed)
                .map(|(id, _)| id.clone())
                .collect();

            events.push(if failed.is_empty() {
                GroupProcessEvent::Completed { completed, at }
            } else {
                GroupProcessEvent::Failed {
                    completed,
                    failed,
                    at,
                }
            });
        }

        ProcessOutput::events(events)
    }
}

impl ProcessManager for GroupProcess {
    type Input = GroupProcessInput;
    type Event = GroupProcessEvent;
    type Command = GroupMemberCommand;
    type State = GroupProcessState;
    type Error = GroupProcessError;

    fn initial_state() -> GroupProcessState {
        GroupProcessState::NotStarted
    }

    fn react(
        state: &GroupProcessState,
        input: &GroupProcessInput,
    ) -> Result<GroupOutput, GroupProcessError> {
        match (state, input) {
            (
                GroupProcessState::NotStarted,
                GroupProcessInput::Initiate {
                    members,
                    initiated_by,
                    at,
                },
            ) => Self::initiate(members, initiated_by, *at),

            // Re-initiation of a live or finished process: idempotent no-op
            // under at-least-once command delivery.
            (_, GroupProcessInput::Initiate { .. }) => Ok(ProcessOutput::none()),

            (
                GroupProcessState::Initiated { members },
                GroupProcessInput::MemberStarted { member, at },
            ) => Ok(match members.get(member) {
                Some(MemberStatus::Pending) => {
                    ProcessOutput::events(vec![GroupProcessEvent::MemberStarted {
                        member: member.clone(),
                        at: *at,
                    }])
                }
                // Unknown member, already started, or already closed.
                _ => ProcessOutput::none(),
            }),

            (
                GroupProcessState::Initiated { members },
                GroupProcessInput::MemberSucceeded { member, at },
            ) => Ok(Self::close_member(
                members,
                member,
                MemberOutcome::Completed,
                *at,
            )),

            (
                GroupProcessState::Initiated { members },
                GroupProcessInput::MemberFailed { member, reason, at },
            ) => Ok(Self::close_member(
                members,
                member,
                MemberOutcome::Failed {
                    reason: reason.clone(),
                },
                *at,
            )),

            // Member signals before initiation or after finalization are
            // absorbed, not errors.
            (GroupProcessState::NotStarted | GroupProcessState::Finished, _) => {
                Ok(ProcessOutput::none())
            }
        }
    }

    fn evolve(state: GroupProcessState, event: &GroupProcessEvent) -> GroupProcessState {
        match (state, event) {
            (GroupProcessState::NotStarted, GroupProcessEvent::Initiated { members, .. }) => {
                GroupProcessState::Initiated {
                    members: members
                        .iter()
                        .map(|member| (member.clone(), MemberStatus::Pending))
                        .collect(),
                }
            }

            (
                GroupProcessState::Initiated { mut members },
                GroupProcessEvent::MemberStarted { member, .. },
            ) => {
                if members.get(member) == Some(&MemberStatus::Pending) {
                    members.insert(member.clone(), MemberStatus::Initiated);
                }
                GroupProcessState::Initiated { members }
            }

            (
                GroupProcessState::Initiated { mut members },
                GroupProcessEvent::MemberOutcomeRecorded {
                    member, outcome, ..
                },
            ) => {
                // Closed entries are never overwritten, so replaying a
                // duplicated record cannot flip an outcome.
                if members.get(member).is_some_and(|s| !s.is_closed()) {
                    members.insert(member.clone(), outcome.status());
                }
                GroupProcessState::Initiated { members }
            }

            (
                GroupProcessState::Initiated { .. },
                GroupProcessEvent::Completed { .. } | GroupProcessEvent::Failed { .. },
            ) => GroupProcessState::Finished,

            // Finished absorbs everything; other combinations are foreign
            // events that leave the state unchanged.
            (state, _) => state,
        }
    }
}
