// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Session messages and the per-session state machine.
//!
//! A session progresses `Uninitiated -> Initiating -> Initiated` and is
//! removed from the checkpoint when closed. Each variant carries exactly the
//! sequencing and buffering state that stage needs; every transition site
//! matches on the variant exhaustively, so a new stage cannot be added
//! without the compiler pointing at every place that must handle it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::flow::{FlowInfo, MessageIdentifier, Payload, SequenceNumber, SessionId};
use crate::identity::Party;

/// The first message on a session, delivered to a peer that has no session
/// state yet. Carries everything the peer needs to start the counter-flow.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InitialSessionMessage {
    pub initiator_session_id: SessionId,
    /// Extra entropy mixed into the initiated side's deduplication seed.
    pub initiation_entropy: u64,
    pub initiator_flow_name: String,
    pub flow_version: u32,
    pub app_name: String,
    pub first_payload: Option<Payload>,
}

/// The peer's acknowledgement of an initiation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmSessionMessage {
    pub initiated_session_id: SessionId,
    pub initiated_flow_info: FlowInfo,
}

/// The peer refused the initiation (no such flow, version mismatch, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RejectSessionMessage {
    pub message: String,
    pub error_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSessionMessage {
    pub payload: Payload,
}

/// The peer's flow failed. `flow_error` carries an application-level error
/// the peer chose to propagate; `None` means the counter-flow died
/// unexpectedly.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorSessionMessage {
    pub flow_error: Option<FlowError>,
    pub error_id: u64,
}

/// Messages on an already-established session, addressed to the recipient's
/// session id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExistingSessionMessagePayload {
    Confirm(ConfirmSessionMessage),
    Data(DataSessionMessage),
    Error(ErrorSessionMessage),
    Reject(RejectSessionMessage),
    End,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExistingSessionMessage {
    pub recipient_session_id: SessionId,
    pub payload: ExistingSessionMessagePayload,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionMessage {
    Initial(InitialSessionMessage),
    Existing(ExistingSessionMessage),
}

/// A session before any message has been sent on it. Created when the flow
/// asks for a session; nothing has gone over the wire yet.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UninitiatedSessionState {
    pub destination: Party,
    pub initiating_flow_name: String,
    pub flow_info: FlowInfo,
    pub additional_entropy: u64,
    pub deduplication_seed: String,
    /// Set when the peer's confirmation arrived before we ever sent: replay
    /// after a crash where the initiation was already delivered. The first
    /// send then moves straight to `Initiated` without emitting anything.
    pub has_been_acknowledged: Option<(Party, ConfirmSessionMessage)>,
}

/// The initiation has been sent but not yet confirmed. Outbound data is
/// buffered, to be flushed once the peer confirms.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InitiatingSessionState {
    pub buffered_messages: Vec<(MessageIdentifier, DataSessionMessage)>,
    pub rejection_error: Option<FlowError>,
    pub deduplication_seed: String,
    pub next_sending_seq_number: SequenceNumber,
    pub shard_id: String,
    pub received_messages: BTreeMap<SequenceNumber, ExistingSessionMessagePayload>,
    pub last_sender_uuid: Option<String>,
    pub last_sender_seq_no: Option<SequenceNumber>,
}

impl InitiatingSessionState {
    /// Buffers an outbound data message under the next sequence number.
    pub fn buffer_message(
        mut self,
        message_identifier: MessageIdentifier,
        message: DataSessionMessage,
    ) -> Self {
        self.buffered_messages.push((message_identifier, message));
        self.next_sending_seq_number += 1;
        self
    }
}

/// A fully established session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InitiatedSessionState {
    pub peer_party: Party,
    pub peer_flow_info: FlowInfo,
    /// The id the peer receives under; all our sends are addressed to it.
    pub peer_sink_session_id: SessionId,
    pub received_messages: BTreeMap<SequenceNumber, ExistingSessionMessagePayload>,
    pub other_side_errored: bool,
    pub next_sending_seq_number: SequenceNumber,
    pub last_processed_seq_number: SequenceNumber,
    pub shard_id: String,
    pub deduplication_seed: String,
    pub last_sender_uuid: Option<String>,
    pub last_sender_seq_no: Option<SequenceNumber>,
}

impl InitiatedSessionState {
    fn next_seq_number(&self) -> SequenceNumber {
        self.last_processed_seq_number + 1
    }

    /// Whether the next in-order message has been delivered.
    pub fn has_next_message_arrived(&self) -> bool {
        self.received_messages.contains_key(&self.next_seq_number())
    }

    /// Whether the next in-order message is a peer error.
    pub fn has_errored(&self) -> bool {
        matches!(
            self.received_messages.get(&self.next_seq_number()),
            Some(ExistingSessionMessagePayload::Error(_))
        )
    }

    /// Whether the next in-order message ends the session.
    pub fn next_message_is_end(&self) -> bool {
        matches!(
            self.received_messages.get(&self.next_seq_number()),
            Some(ExistingSessionMessagePayload::End)
        )
    }

    /// Removes and returns the next in-order message, advancing the processed
    /// sequence number. Returns `None` if it has not arrived yet.
    pub fn extract_message(&self) -> Option<(ExistingSessionMessagePayload, InitiatedSessionState)> {
        let seq = self.next_seq_number();
        let message = self.received_messages.get(&seq)?.clone();
        let mut new_state = self.clone();
        new_state.received_messages.remove(&seq);
        new_state.last_processed_seq_number = seq;
        Some((message, new_state))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Uninitiated(UninitiatedSessionState),
    Initiating(InitiatingSessionState),
    Initiated(InitiatedSessionState),
}

impl SessionState {
    /// The last-seen sender identity and sequence for this session, recorded
    /// at close time for duplicate detection.
    pub fn last_sender_info(&self) -> (Option<String>, Option<SequenceNumber>) {
        match self {
            SessionState::Uninitiated(_) => (None, None),
            SessionState::Initiating(state) => {
                (state.last_sender_uuid.clone(), state.last_sender_seq_no)
            }
            SessionState::Initiated(state) => {
                (state.last_sender_uuid.clone(), state.last_sender_seq_no)
            }
        }
    }
}
