// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! The durable snapshot of a flow's progress.
//!
//! Checkpoints are plain immutable values: every helper returns a new
//! checkpoint rather than mutating in place, so a transition is a pure
//! function from (old checkpoint, event) to (new checkpoint, actions) and
//! replays identically after a restart. Nothing here caches or lazily
//! computes; what is serialized is exactly what is compared.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::flow::{FlowIoRequest, SequenceNumber, SessionId};
use crate::session::SessionState;
use crate::TimestampMs;

pub type SessionMap = BTreeMap<SessionId, SessionState>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub sessions: SessionMap,
    /// Sessions whose peer has initiated a close; pruned once the end
    /// message has been fully received and acknowledged.
    pub sessions_to_be_closed: BTreeSet<SessionId>,
    /// The I/O request the flow is currently suspended on.
    pub flow_io_request: Option<FlowIoRequest>,
    pub suspension_time: TimestampMs,
    pub number_of_suspends: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_state: CheckpointState,
}

impl Checkpoint {
    pub fn new(suspension_time: TimestampMs) -> Self {
        Self {
            checkpoint_state: CheckpointState {
                sessions: SessionMap::new(),
                sessions_to_be_closed: BTreeSet::new(),
                flow_io_request: None,
                suspension_time,
                number_of_suspends: 0,
            },
        }
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.checkpoint_state.sessions
    }

    /// A copy of this checkpoint with the session map replaced.
    pub fn set_sessions(&self, sessions: SessionMap) -> Checkpoint {
        let mut new = self.clone();
        new.checkpoint_state.sessions = sessions;
        new
    }

    /// A copy of this checkpoint with one session added or replaced.
    pub fn add_session(&self, session: (SessionId, SessionState)) -> Checkpoint {
        let mut new = self.clone();
        new.checkpoint_state.sessions.insert(session.0, session.1);
        new
    }

    /// A copy of this checkpoint with the given sessions removed, both from
    /// the session map and from the to-be-closed set.
    pub fn remove_sessions(&self, session_ids: &BTreeSet<SessionId>) -> Checkpoint {
        let mut new = self.clone();
        for session_id in session_ids {
            new.checkpoint_state.sessions.remove(session_id);
            new.checkpoint_state.sessions_to_be_closed.remove(session_id);
        }
        new
    }

    /// A copy of this checkpoint suspended on a different I/O request.
    pub fn set_flow_io_request(&self, request: Option<FlowIoRequest>) -> Checkpoint {
        let mut new = self.clone();
        new.checkpoint_state.flow_io_request = request;
        new
    }
}

/// Last-seen sender identity for a closed session, kept until the closure has
/// been signalled so late duplicates can still be recognized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderSignalInfo {
    pub last_sender_uuid: Option<String>,
    pub last_sender_seq_no: Option<SequenceNumber>,
}

/// The full per-flow state the transition engine operates on: the durable
/// checkpoint plus the in-memory flags that govern resumption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachineState {
    pub checkpoint: Checkpoint,
    pub is_flow_resumed: bool,
    /// Set while the flow is suspended on a future (sleep, ledger commit,
    /// async operation). Re-entrant transition requests while set are no-ops.
    pub is_waiting_for_future: bool,
    pub sender_uuid: Option<String>,
    pub closed_sessions_pending_to_be_signalled: BTreeMap<SessionId, SenderSignalInfo>,
}

impl StateMachineState {
    pub fn new(checkpoint: Checkpoint, sender_uuid: Option<String>) -> Self {
        Self {
            checkpoint,
            is_flow_resumed: false,
            is_waiting_for_future: false,
            sender_uuid,
            closed_sessions_pending_to_be_signalled: BTreeMap::new(),
        }
    }
}
