// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use crate::flow::{
    generate_shard_id, FlowId, FlowInfo, MessageIdentifier, MessageType, Payload, SessionId,
};
use crate::identity::Party;
use crate::session::{
    DataSessionMessage, ErrorSessionMessage, ExistingSessionMessage,
    ExistingSessionMessagePayload, InitialSessionMessage, InitiatedSessionState,
    InitiatingSessionState, SessionMessage,
};

fn initiated(received: BTreeMap<u64, ExistingSessionMessagePayload>) -> InitiatedSessionState {
    InitiatedSessionState {
        peer_party: Party::new("Peer", Default::default()),
        peer_flow_info: FlowInfo { flow_version: 1, app_name: "app".to_owned() },
        peer_sink_session_id: SessionId(42),
        received_messages: received,
        other_side_errored: false,
        next_sending_seq_number: 1,
        last_processed_seq_number: 0,
        shard_id: "shard".to_owned(),
        deduplication_seed: "seed".to_owned(),
        last_sender_uuid: None,
        last_sender_seq_no: None,
    }
}

fn data(byte: u8) -> ExistingSessionMessagePayload {
    ExistingSessionMessagePayload::Data(DataSessionMessage { payload: Payload(vec![byte]) })
}

#[test]
fn messages_are_extracted_strictly_in_order() {
    let mut received = BTreeMap::new();
    received.insert(2, data(2));
    let state = initiated(received);

    // Sequence 1 has not arrived, so nothing is extractable yet.
    assert!(!state.has_next_message_arrived());
    assert!(state.extract_message().is_none());

    let mut received = state.received_messages.clone();
    received.insert(1, data(1));
    let state = initiated(received);

    let (first, state) = state.extract_message().unwrap();
    assert_eq!(first, data(1));
    assert_eq!(state.last_processed_seq_number, 1);

    let (second, state) = state.extract_message().unwrap();
    assert_eq!(second, data(2));
    assert!(!state.has_next_message_arrived());
}

#[test]
fn has_errored_looks_only_at_the_next_message() {
    let mut received = BTreeMap::new();
    received.insert(1, data(1));
    received.insert(
        2,
        ExistingSessionMessagePayload::Error(ErrorSessionMessage { flow_error: None, error_id: 9 }),
    );
    let state = initiated(received);

    // An error behind a pending data message is not yet visible.
    assert!(!state.has_errored());
    let (_, state) = state.extract_message().unwrap();
    assert!(state.has_errored());
}

#[test]
fn buffering_increments_the_send_sequence() {
    let state = InitiatingSessionState {
        buffered_messages: vec![],
        rejection_error: None,
        deduplication_seed: "seed".to_owned(),
        next_sending_seq_number: 1,
        shard_id: "shard".to_owned(),
        received_messages: BTreeMap::new(),
        last_sender_uuid: None,
        last_sender_seq_no: None,
    };
    let identifier = MessageIdentifier {
        message_type: MessageType::DataMessage,
        shard_id: "shard".to_owned(),
        session_identifier: SessionId(1),
        session_sequence_number: 1,
        timestamp: 0,
    };

    let state = state
        .buffer_message(identifier.clone(), DataSessionMessage { payload: Payload(vec![1]) });
    let state = state.buffer_message(
        MessageIdentifier { session_sequence_number: 2, ..identifier },
        DataSessionMessage { payload: Payload(vec![2]) },
    );

    assert_eq!(state.buffered_messages.len(), 2);
    assert_eq!(state.next_sending_seq_number, 3);
}

#[test]
fn initiated_session_id_is_deterministic() {
    let session_id = SessionId(100);
    assert_eq!(session_id.initiated_session_id(), SessionId(101));
    assert_eq!(session_id.initiated_session_id(), SessionId(101));

    let random = SessionId::random();
    assert_eq!(random.initiated_session_id(), SessionId(random.0.wrapping_add(1)));
}

#[test]
fn message_type_is_inferred_from_the_message_shape() {
    let initial = SessionMessage::Initial(InitialSessionMessage {
        initiator_session_id: SessionId(1),
        initiation_entropy: 0,
        initiator_flow_name: "flow".to_owned(),
        flow_version: 1,
        app_name: "app".to_owned(),
        first_payload: None,
    });
    assert_eq!(MessageType::infer(&initial), MessageType::SessionInit);

    let end = SessionMessage::Existing(ExistingSessionMessage {
        recipient_session_id: SessionId(2),
        payload: ExistingSessionMessagePayload::End,
    });
    assert_eq!(MessageType::infer(&end), MessageType::SessionEnd);

    let error = SessionMessage::Existing(ExistingSessionMessage {
        recipient_session_id: SessionId(2),
        payload: ExistingSessionMessagePayload::Error(ErrorSessionMessage {
            flow_error: None,
            error_id: 1,
        }),
    });
    assert_eq!(MessageType::infer(&error), MessageType::SessionError);
}

#[test]
fn shard_id_is_stable_per_flow() {
    let flow_id = FlowId(7);
    assert_eq!(generate_shard_id(&flow_id), generate_shard_id(&flow_id));
    assert_ne!(generate_shard_id(&flow_id), generate_shard_id(&FlowId(8)));
    assert_eq!(generate_shard_id(&flow_id).len(), 8);
    assert_ne!(
        generate_shard_id(&FlowId::random()),
        generate_shard_id(&FlowId::random())
    );
}
