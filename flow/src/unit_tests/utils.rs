// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use types::checkpoint::{Checkpoint, StateMachineState};
use types::flow::{FlowId, FlowInfo, Payload, SequenceNumber, SessionId};
use types::identity::Party;
use types::session::{
    ConfirmSessionMessage, DataSessionMessage, ExistingSessionMessagePayload,
    InitiatedSessionState, InitiatingSessionState, SessionState, UninitiatedSessionState,
};

use crate::context::TransitionContext;

pub const SUSPENSION_TIME: u64 = 1_700_000_000_000;

pub fn context() -> TransitionContext {
    TransitionContext::new(FlowId(7), 99)
}

pub fn peer() -> Party {
    Party::new("Peer", Default::default())
}

pub fn flow_info() -> FlowInfo {
    FlowInfo { flow_version: 1, app_name: "com.tessera.test.app".to_owned() }
}

pub fn state_with_sessions(
    sessions: Vec<(SessionId, SessionState)>,
) -> StateMachineState {
    let checkpoint =
        Checkpoint::new(SUSPENSION_TIME).set_sessions(sessions.into_iter().collect());
    StateMachineState::new(checkpoint, Some("sender-uuid".to_owned()))
}

pub fn uninitiated() -> SessionState {
    SessionState::Uninitiated(UninitiatedSessionState {
        destination: peer(),
        initiating_flow_name: "com.tessera.test.PaymentFlow".to_owned(),
        flow_info: flow_info(),
        additional_entropy: 11,
        deduplication_seed: "seed".to_owned(),
        has_been_acknowledged: None,
    })
}

/// An uninitiated session whose peer already confirmed an initiation
/// delivered by a previous incarnation of the flow.
pub fn pre_acknowledged(sink: SessionId) -> SessionState {
    SessionState::Uninitiated(UninitiatedSessionState {
        destination: peer(),
        initiating_flow_name: "com.tessera.test.PaymentFlow".to_owned(),
        flow_info: flow_info(),
        additional_entropy: 11,
        deduplication_seed: "seed".to_owned(),
        has_been_acknowledged: Some((
            peer(),
            ConfirmSessionMessage {
                initiated_session_id: sink,
                initiated_flow_info: flow_info(),
            },
        )),
    })
}

pub fn initiating() -> SessionState {
    SessionState::Initiating(InitiatingSessionState {
        buffered_messages: Vec::new(),
        rejection_error: None,
        deduplication_seed: "seed".to_owned(),
        next_sending_seq_number: 1,
        shard_id: "shard".to_owned(),
        received_messages: BTreeMap::new(),
        last_sender_uuid: None,
        last_sender_seq_no: None,
    })
}

pub fn initiated(
    sink: SessionId,
    received: BTreeMap<SequenceNumber, ExistingSessionMessagePayload>,
) -> SessionState {
    SessionState::Initiated(InitiatedSessionState {
        peer_party: peer(),
        peer_flow_info: flow_info(),
        peer_sink_session_id: sink,
        received_messages: received,
        other_side_errored: false,
        next_sending_seq_number: 1,
        last_processed_seq_number: 0,
        shard_id: "shard".to_owned(),
        deduplication_seed: "seed".to_owned(),
        last_sender_uuid: Some("peer-uuid".to_owned()),
        last_sender_seq_no: Some(3),
    })
}

pub fn payload(byte: u8) -> Payload {
    Payload(vec![byte])
}

pub fn data(byte: u8) -> ExistingSessionMessagePayload {
    ExistingSessionMessagePayload::Data(DataSessionMessage { payload: payload(byte) })
}
