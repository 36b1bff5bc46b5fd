// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! What a transition produces: side-effecting actions for the scheduler to
//! execute and a continuation telling it what to do with the flow itself.

use std::collections::{BTreeMap, BTreeSet};

use types::checkpoint::StateMachineState;
use types::digests::SecureHash;
use types::error::FlowError;
use types::flow::{FlowInfo, Payload, SenderDeduplicationInfo, SessionId};
use types::identity::Party;
use types::session::{ExistingSessionMessage, InitialSessionMessage};
use types::TimestampMs;

/// A side effect the transition engine asks the scheduler to perform. The
/// engine never performs I/O itself; executing these is the action
/// executor's concern, outside this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Deliver a session initiation to a peer that holds no session state
    /// for us yet.
    SendInitial {
        destination: Party,
        message: InitialSessionMessage,
        dedup: SenderDeduplicationInfo,
    },
    /// Deliver a message on an established session, addressed to the peer's
    /// sink session id.
    SendExisting {
        peer: Party,
        message: ExistingSessionMessage,
        dedup: SenderDeduplicationInfo,
    },
    /// Unbind closed sessions from the message routing table.
    RemoveSessionBindings { session_ids: BTreeSet<SessionId> },
    /// Wake the flow once the given instant has passed.
    SleepUntil { wake_up_after: TimestampMs },
    /// Wake the flow once the transaction is committed to the ledger.
    TrackTransaction { hash: SecureHash },
    /// Start the named asynchronous operation. The deduplication id stays
    /// stable across replays of the same suspension, so the operation can
    /// recognize a re-execution after a crash.
    ExecuteAsyncOperation {
        operation_name: String,
        deduplication_id: String,
    },
}

/// The value a [`FlowContinuation::Resume`] hands back to the suspended flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumedValue {
    Unit,
    /// One payload per requested session, for receives.
    Messages(BTreeMap<SessionId, Payload>),
    /// The peer's flow info per requested session.
    FlowInfos(BTreeMap<SessionId, FlowInfo>),
}

/// What the scheduler does with the flow after executing the actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowContinuation {
    /// Stay suspended; re-evaluate when the next event arrives.
    ProcessEvents,
    Resume(ResumedValue),
    /// Deliver the error into the flow's normal exception handling.
    Throw(FlowError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub new_state: StateMachineState,
    pub actions: Vec<Action>,
    pub continuation: FlowContinuation,
}

impl TransitionResult {
    /// A transition that changes nothing and keeps waiting. Used for
    /// re-delivered wake-ups while the flow is already suspended on a
    /// future.
    pub fn unchanged(state: StateMachineState) -> Self {
        Self {
            new_state: state,
            actions: Vec::new(),
            continuation: FlowContinuation::ProcessEvents,
        }
    }
}
