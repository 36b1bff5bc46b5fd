// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Flow-level identifiers and the suspended I/O request vocabulary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::digests::SecureHash;
use crate::session::SessionMessage;
use crate::TimestampMs;

/// Identifies one flow run on this node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowId(pub u128);

impl FlowId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl Display for FlowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Debug for FlowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "FlowId({self})")
    }
}

/// Identifies one direction of a session. The initiating side picks a random
/// id; the initiated side's id is derived from it so both sides agree without
/// a negotiation round.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u128);

impl SessionId {
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// The id the peer's initiated session will use as its source.
    pub fn initiated_session_id(&self) -> SessionId {
        SessionId(self.0.wrapping_add(1))
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Debug for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

/// Per-session-direction message sequence number. Data messages start at 1;
/// sequence 0 is reserved for the session-initiation message.
pub type SequenceNumber = u64;

/// Version information a peer learns about the flow on the other side.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowInfo {
    pub flow_version: u32,
    pub app_name: String,
}

/// An opaque serialized flow message payload.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Payload(pub Vec<u8>);

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Debug for Payload {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

/// Groups a flow's outbound messages for observability and sharded delivery.
/// Derived deterministically from the flow id.
pub fn generate_shard_id(flow_id: &FlowId) -> String {
    SecureHash::hash(flow_id.0.to_be_bytes()).prefix_chars(8)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    SessionInit,
    SessionConfirm,
    SessionReject,
    DataMessage,
    SessionEnd,
    SessionError,
}

impl MessageType {
    pub fn infer(message: &SessionMessage) -> MessageType {
        use crate::session::ExistingSessionMessagePayload::*;
        match message {
            SessionMessage::Initial(_) => MessageType::SessionInit,
            SessionMessage::Existing(existing) => match existing.payload {
                Confirm(_) => MessageType::SessionConfirm,
                Reject(_) => MessageType::SessionReject,
                Data(_) => MessageType::DataMessage,
                Error(_) => MessageType::SessionError,
                End => MessageType::SessionEnd,
            },
        }
    }
}

/// Uniquely identifies a message for exactly-once delivery: the receiver
/// deduplicates on (shard, session, sequence number).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageIdentifier {
    pub message_type: MessageType,
    pub shard_id: String,
    pub session_identifier: SessionId,
    pub session_sequence_number: SequenceNumber,
    pub timestamp: TimestampMs,
}

/// Everything the delivery layer needs to deduplicate a send on the far side.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderDeduplicationInfo {
    pub message_identifier: MessageIdentifier,
    pub sender_uuid: Option<String>,
}

/// The I/O request a flow suspends on. Persisted inside the checkpoint, so a
/// restarted node re-evaluates the same request against the restored session
/// states.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowIoRequest {
    Send {
        session_to_message: BTreeMap<SessionId, Payload>,
    },
    Receive {
        sessions: BTreeSet<SessionId>,
    },
    SendAndReceive {
        session_to_message: BTreeMap<SessionId, Payload>,
    },
    CloseSessions {
        sessions: BTreeSet<SessionId>,
    },
    WaitForLedgerCommit {
        hash: SecureHash,
    },
    Sleep {
        wake_up_after: TimestampMs,
    },
    GetFlowInfo {
        sessions: BTreeSet<SessionId>,
    },
    WaitForSessionConfirmations,
    ExecuteAsyncOperation {
        operation_name: String,
    },
    ForceCheckpoint,
}
