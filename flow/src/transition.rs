// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Computes the transition for a started flow's suspended I/O request.
//!
//! The shape is fixed: collect the errors relevant to the request first and
//! short-circuit to a `Throw` if any exist, then dispatch on the request
//! kind, then run the unconditional terminal-session cleanup over whatever
//! the sub-transition produced. Every sub-transition matches session-state
//! variants exhaustively, so adding a variant forces every site to handle
//! it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use types::checkpoint::{SenderSignalInfo, StateMachineState};
use types::digests::SecureHash;
use types::error::FlowError;
use types::flow::{
    generate_shard_id, FlowIoRequest, MessageIdentifier, MessageType, Payload,
    SenderDeduplicationInfo, SessionId,
};
use types::identity::Party;
use types::session::{
    DataSessionMessage, ErrorSessionMessage, ExistingSessionMessage,
    ExistingSessionMessagePayload, InitialSessionMessage, InitiatedSessionState,
    InitiatingSessionState, SessionState, UninitiatedSessionState,
};
use types::TimestampMs;

use crate::action::{Action, FlowContinuation, ResumedValue, TransitionResult};
use crate::context::TransitionContext;

/// Computes the transition for `request` against `starting_state`. Pure: no
/// I/O, no ambient reads, identical inputs produce identical results.
pub fn transition(
    context: &TransitionContext,
    starting_state: StateMachineState,
    request: FlowIoRequest,
) -> TransitionResult {
    StartedFlowTransition { context, starting_state, request, next_error_ordinal: 0 }.run()
}

/// Accumulates the state updates and actions of one sub-transition. On a
/// fresh error the transition is abandoned: the starting state is restored,
/// accumulated actions are dropped and the error is delivered as a `Throw`.
struct TransitionBuilder {
    starting_state: StateMachineState,
    current_state: StateMachineState,
    actions: Vec<Action>,
    pending_error: Option<FlowError>,
}

impl TransitionBuilder {
    fn new(starting_state: StateMachineState) -> Self {
        Self {
            current_state: starting_state.clone(),
            starting_state,
            actions: Vec::new(),
            pending_error: None,
        }
    }

    fn is_errored(&self) -> bool {
        self.pending_error.is_some()
    }

    /// Latches the first error; later errors are dropped (first-error-wins).
    fn fresh_error_transition(&mut self, error: FlowError) {
        if self.pending_error.is_none() {
            self.pending_error = Some(error);
        }
    }

    fn suspend(self) -> TransitionResult {
        self.finish(FlowContinuation::ProcessEvents)
    }

    fn resume(mut self, value: ResumedValue) -> TransitionResult {
        self.current_state.is_flow_resumed = true;
        self.finish(FlowContinuation::Resume(value))
    }

    /// Delivers an error into the flow while keeping the state and actions
    /// this transition produced, e.g. a receive that established sessions
    /// before finding an end message.
    fn throw_into_flow(mut self, error: FlowError) -> TransitionResult {
        self.current_state.is_flow_resumed = true;
        self.finish(FlowContinuation::Throw(error))
    }

    fn finish(self, continuation: FlowContinuation) -> TransitionResult {
        if let Some(error) = self.pending_error {
            let mut state = self.starting_state;
            state.is_flow_resumed = true;
            return TransitionResult {
                new_state: state,
                actions: Vec::new(),
                continuation: FlowContinuation::Throw(error),
            };
        }
        TransitionResult { new_state: self.current_state, actions: self.actions, continuation }
    }
}

struct StartedFlowTransition<'a> {
    context: &'a TransitionContext,
    starting_state: StateMachineState,
    request: FlowIoRequest,
    next_error_ordinal: u64,
}

impl StartedFlowTransition<'_> {
    fn run(mut self) -> TransitionResult {
        let (new_state, errors) = self.collect_relevant_errors_to_throw();
        if let Some(first) = errors.into_iter().next() {
            // Throw the first error; whether the rest should be aggregated
            // somehow is an open question.
            let mut state = new_state;
            state.is_flow_resumed = true;
            return TransitionResult {
                new_state: state,
                actions: Vec::new(),
                continuation: FlowContinuation::Throw(first),
            };
        }
        let result = match self.request.clone() {
            FlowIoRequest::Send { session_to_message } => self.send_transition(session_to_message),
            FlowIoRequest::Receive { sessions } => self.receive_transition(sessions),
            FlowIoRequest::SendAndReceive { session_to_message } => {
                self.send_and_receive_transition(session_to_message)
            }
            FlowIoRequest::CloseSessions { sessions } => self.close_sessions_transition(sessions),
            FlowIoRequest::WaitForLedgerCommit { hash } => {
                self.wait_for_ledger_commit_transition(hash)
            }
            FlowIoRequest::Sleep { wake_up_after } => self.sleep_transition(wake_up_after),
            FlowIoRequest::GetFlowInfo { sessions } => self.get_flow_info_transition(sessions),
            FlowIoRequest::WaitForSessionConfirmations => {
                self.wait_for_session_confirmations_transition()
            }
            FlowIoRequest::ExecuteAsyncOperation { operation_name } => {
                self.execute_async_operation_transition(operation_name)
            }
            FlowIoRequest::ForceCheckpoint => self.force_checkpoint_transition(),
        };
        terminate_sessions_if_required(result)
    }

    fn builder(&self) -> TransitionBuilder {
        TransitionBuilder::new(self.starting_state.clone())
    }

    fn next_error_id(&mut self) -> u64 {
        let id = self.context.error_id(self.next_error_ordinal);
        self.next_error_ordinal += 1;
        id
    }

    fn suspension_time(&self) -> TimestampMs {
        self.starting_state.checkpoint.checkpoint_state.suspension_time
    }

    // ---- Send ----

    fn send_transition(
        &mut self,
        session_to_message: BTreeMap<SessionId, Payload>,
    ) -> TransitionResult {
        let mut builder = self.builder();
        self.send_to_sessions(&mut builder, session_to_message);
        if builder.is_errored() {
            builder.suspend()
        } else {
            builder.resume(ResumedValue::Unit)
        }
    }

    fn send_to_sessions(
        &mut self,
        builder: &mut TransitionBuilder,
        session_to_message: BTreeMap<SessionId, Payload>,
    ) {
        let checkpoint = builder.current_state.checkpoint.clone();
        let mut new_sessions = checkpoint.sessions().clone();
        let suspension_time = self.suspension_time();
        let shard_id = generate_shard_id(&self.context.flow_id);
        let sender_uuid = builder.current_state.sender_uuid.clone();
        let mut initial_actions = Vec::new();
        let mut existing_actions = Vec::new();

        for (session_id, payload) in session_to_message {
            let Some(session_state) = checkpoint.sessions().get(&session_id) else {
                return builder.fresh_error_transition(FlowError::CannotFindSession { session_id });
            };
            match session_state {
                SessionState::Uninitiated(uninitiated) => {
                    if let Some((peer, confirm)) = &uninitiated.has_been_acknowledged {
                        // The peer confirmed an initiation delivered by a
                        // previous incarnation of this flow, which already
                        // carried the first payload. Nothing is re-sent; the
                        // data sequence restarts at 1.
                        new_sessions.insert(
                            session_id,
                            SessionState::Initiated(InitiatedSessionState {
                                peer_party: peer.clone(),
                                peer_flow_info: confirm.initiated_flow_info.clone(),
                                peer_sink_session_id: confirm.initiated_session_id,
                                received_messages: BTreeMap::new(),
                                other_side_errored: false,
                                next_sending_seq_number: 1,
                                last_processed_seq_number: 0,
                                shard_id: shard_id.clone(),
                                deduplication_seed: uninitiated.deduplication_seed.clone(),
                                last_sender_uuid: None,
                                last_sender_seq_no: None,
                            }),
                        );
                    } else {
                        let message = initial_session_message(
                            uninitiated,
                            session_id,
                            Some(payload),
                        );
                        let message_identifier = MessageIdentifier {
                            message_type: MessageType::SessionInit,
                            shard_id: shard_id.clone(),
                            session_identifier: session_id.initiated_session_id(),
                            session_sequence_number: 0,
                            timestamp: suspension_time,
                        };
                        initial_actions.push(Action::SendInitial {
                            destination: uninitiated.destination.clone(),
                            message,
                            dedup: SenderDeduplicationInfo {
                                message_identifier,
                                sender_uuid: sender_uuid.clone(),
                            },
                        });
                        new_sessions.insert(
                            session_id,
                            SessionState::Initiating(InitiatingSessionState {
                                buffered_messages: Vec::new(),
                                rejection_error: None,
                                deduplication_seed: uninitiated.deduplication_seed.clone(),
                                next_sending_seq_number: 1,
                                shard_id: shard_id.clone(),
                                received_messages: BTreeMap::new(),
                                last_sender_uuid: None,
                                last_sender_seq_no: None,
                            }),
                        );
                    }
                }
                SessionState::Initiating(initiating) => {
                    // Buffered until the peer confirms; the confirmation
                    // handling flushes the buffer, not this transition.
                    let message_identifier = MessageIdentifier {
                        message_type: MessageType::DataMessage,
                        shard_id: initiating.shard_id.clone(),
                        session_identifier: session_id.initiated_session_id(),
                        session_sequence_number: initiating.next_sending_seq_number,
                        timestamp: suspension_time,
                    };
                    new_sessions.insert(
                        session_id,
                        SessionState::Initiating(initiating.clone().buffer_message(
                            message_identifier,
                            DataSessionMessage { payload },
                        )),
                    );
                }
                SessionState::Initiated(initiated) => {
                    let message = ExistingSessionMessage {
                        recipient_session_id: initiated.peer_sink_session_id,
                        payload: ExistingSessionMessagePayload::Data(DataSessionMessage {
                            payload,
                        }),
                    };
                    let message_identifier = MessageIdentifier {
                        message_type: MessageType::DataMessage,
                        shard_id: initiated.shard_id.clone(),
                        session_identifier: initiated.peer_sink_session_id,
                        session_sequence_number: initiated.next_sending_seq_number,
                        timestamp: suspension_time,
                    };
                    existing_actions.push(Action::SendExisting {
                        peer: initiated.peer_party.clone(),
                        message,
                        dedup: SenderDeduplicationInfo {
                            message_identifier,
                            sender_uuid: sender_uuid.clone(),
                        },
                    });
                    let mut advanced = initiated.clone();
                    advanced.next_sending_seq_number += 1;
                    new_sessions.insert(session_id, SessionState::Initiated(advanced));
                }
            }
        }

        builder.actions.extend(initial_actions);
        builder.actions.extend(existing_actions);
        builder.current_state.checkpoint = checkpoint.set_sessions(new_sessions);
    }

    // ---- Receive ----

    fn receive_transition(&mut self, sessions: BTreeSet<SessionId>) -> TransitionResult {
        let mut builder = self.builder();
        // A receive implicitly establishes any session that has not sent its
        // initiation yet.
        self.send_initial_session_messages_if_needed(&mut builder, &sessions);
        if builder.is_errored() {
            return builder.suspend();
        }
        match self.receive_from_sessions(&mut builder, &sessions) {
            Ok(Some(messages)) => builder.resume(ResumedValue::Messages(messages)),
            Ok(None) => builder.suspend(),
            Err(error) => builder.throw_into_flow(error),
        }
    }

    /// Polls the requested sessions. All-or-nothing: either every session
    /// has its next in-order message ready and all of them are extracted, or
    /// `None` is returned and nothing is consumed.
    fn receive_from_sessions(
        &mut self,
        builder: &mut TransitionBuilder,
        sessions: &BTreeSet<SessionId>,
    ) -> Result<Option<BTreeMap<SessionId, Payload>>, FlowError> {
        let checkpoint = builder.current_state.checkpoint.clone();
        let mut new_sessions = checkpoint.sessions().clone();
        let mut messages = BTreeMap::new();
        let mut some_not_found = false;
        for session_id in sessions {
            match checkpoint.sessions().get(session_id) {
                Some(SessionState::Initiated(initiated)) => {
                    if !initiated.has_next_message_arrived() {
                        some_not_found = true;
                        continue;
                    }
                    let (message, advanced) =
                        initiated.extract_message().expect("next message has arrived");
                    match message {
                        ExistingSessionMessagePayload::Data(data) => {
                            new_sessions
                                .insert(*session_id, SessionState::Initiated(advanced));
                            messages.insert(*session_id, data.payload);
                        }
                        ExistingSessionMessagePayload::End => {
                            return Err(FlowError::UnexpectedFlowEnd {
                                message: "received a session end message instead of a data \
                                          message; mismatched send and receive?"
                                    .to_owned(),
                                error_id: self.next_error_id(),
                                peer: Some(initiated.peer_party.clone()),
                            });
                        }
                        other => {
                            // Errors were collected before dispatch and
                            // confirmations never target an initiated
                            // session, so anything else is a protocol bug.
                            return Err(FlowError::UnexpectedFlowEnd {
                                message: format!(
                                    "unexpected message on session {session_id}: {other:?}"
                                ),
                                error_id: self.next_error_id(),
                                peer: Some(initiated.peer_party.clone()),
                            });
                        }
                    }
                }
                _ => some_not_found = true,
            }
        }
        if some_not_found {
            Ok(None)
        } else {
            builder.current_state.checkpoint = checkpoint.set_sessions(new_sessions);
            Ok(Some(messages))
        }
    }

    fn send_initial_session_messages_if_needed(
        &mut self,
        builder: &mut TransitionBuilder,
        sessions: &BTreeSet<SessionId>,
    ) {
        let checkpoint = builder.current_state.checkpoint.clone();
        let mut new_sessions = checkpoint.sessions().clone();
        let suspension_time = self.suspension_time();
        let shard_id = generate_shard_id(&self.context.flow_id);
        for session_id in sessions {
            let Some(session_state) = checkpoint.sessions().get(session_id) else {
                return builder
                    .fresh_error_transition(FlowError::CannotFindSession { session_id: *session_id });
            };
            let SessionState::Uninitiated(uninitiated) = session_state else {
                continue;
            };
            let message = initial_session_message(uninitiated, *session_id, None);
            let message_identifier = MessageIdentifier {
                message_type: MessageType::SessionInit,
                shard_id: shard_id.clone(),
                session_identifier: session_id.initiated_session_id(),
                session_sequence_number: 0,
                timestamp: suspension_time,
            };
            builder.actions.push(Action::SendInitial {
                destination: uninitiated.destination.clone(),
                message,
                dedup: SenderDeduplicationInfo {
                    message_identifier,
                    sender_uuid: builder.current_state.sender_uuid.clone(),
                },
            });
            new_sessions.insert(
                *session_id,
                SessionState::Initiating(InitiatingSessionState {
                    buffered_messages: Vec::new(),
                    rejection_error: None,
                    deduplication_seed: uninitiated.deduplication_seed.clone(),
                    next_sending_seq_number: 1,
                    shard_id: shard_id.clone(),
                    received_messages: BTreeMap::new(),
                    last_sender_uuid: None,
                    last_sender_seq_no: None,
                }),
            );
        }
        builder.current_state.checkpoint = checkpoint.set_sessions(new_sessions);
    }

    // ---- SendAndReceive ----

    fn send_and_receive_transition(
        &mut self,
        session_to_message: BTreeMap<SessionId, Payload>,
    ) -> TransitionResult {
        let sessions: BTreeSet<SessionId> = session_to_message.keys().copied().collect();
        let mut builder = self.builder();
        self.send_to_sessions(&mut builder, session_to_message);
        if builder.is_errored() {
            return builder.suspend();
        }
        match self.receive_from_sessions(&mut builder, &sessions) {
            Ok(Some(messages)) => builder.resume(ResumedValue::Messages(messages)),
            Ok(None) => {
                // The sends are done; narrow the checkpointed request to a
                // plain receive so a replay after restart does not resend.
                let narrowed = FlowIoRequest::Receive { sessions };
                builder.current_state.checkpoint =
                    builder.current_state.checkpoint.set_flow_io_request(Some(narrowed));
                builder.suspend()
            }
            Err(error) => builder.throw_into_flow(error),
        }
    }

    // ---- CloseSessions ----

    fn close_sessions_transition(&mut self, sessions: BTreeSet<SessionId>) -> TransitionResult {
        let mut builder = self.builder();
        let checkpoint = builder.current_state.checkpoint.clone();
        let suspension_time = self.suspension_time();
        let shard_id = generate_shard_id(&self.context.flow_id);

        let existing: BTreeMap<SessionId, SessionState> = sessions
            .iter()
            .filter_map(|session_id| {
                checkpoint
                    .sessions()
                    .get(session_id)
                    .map(|session_state| (*session_id, session_state.clone()))
            })
            .collect();
        let already_closed: Vec<SessionId> =
            sessions.iter().filter(|id| !existing.contains_key(id)).copied().collect();
        if !already_closed.is_empty() {
            warn!(?already_closed, "attempting to close already closed sessions");
        }

        if !existing.is_empty() {
            let mut end_actions = Vec::new();
            for (session_id, session_state) in &existing {
                // The error collection pass rejected non-initiated sessions
                // already.
                let SessionState::Initiated(initiated) = session_state else {
                    continue;
                };
                let message = ExistingSessionMessage {
                    recipient_session_id: initiated.peer_sink_session_id,
                    payload: ExistingSessionMessagePayload::End,
                };
                let message_identifier = MessageIdentifier {
                    message_type: MessageType::SessionEnd,
                    shard_id: shard_id.clone(),
                    session_identifier: initiated.peer_sink_session_id,
                    session_sequence_number: initiated.next_sending_seq_number,
                    timestamp: suspension_time,
                };
                end_actions.push(Action::SendExisting {
                    peer: initiated.peer_party.clone(),
                    message,
                    dedup: SenderDeduplicationInfo {
                        message_identifier,
                        sender_uuid: builder.current_state.sender_uuid.clone(),
                    },
                });
                // Remember who was last seen sending on this session, so a
                // late duplicate can still be recognized after removal.
                let (last_sender_uuid, last_sender_seq_no) = session_state.last_sender_info();
                builder.current_state.closed_sessions_pending_to_be_signalled.insert(
                    *session_id,
                    SenderSignalInfo { last_sender_uuid, last_sender_seq_no },
                );
            }
            let existing_ids: BTreeSet<SessionId> = existing.keys().copied().collect();
            builder.current_state.checkpoint = checkpoint.remove_sessions(&existing_ids);
            builder.actions.push(Action::RemoveSessionBindings { session_ids: sessions });
            builder.actions.extend(end_actions);
        }

        builder.resume(ResumedValue::Unit)
    }

    // ---- Futures ----

    fn sleep_transition(&mut self, wake_up_after: TimestampMs) -> TransitionResult {
        // A re-delivered wake-up while already suspended on the future must
        // not emit a second action.
        if self.starting_state.is_waiting_for_future {
            return TransitionResult::unchanged(self.starting_state.clone());
        }
        let mut builder = self.builder();
        builder.current_state.is_waiting_for_future = true;
        builder.actions.push(Action::SleepUntil { wake_up_after });
        builder.suspend()
    }

    fn wait_for_ledger_commit_transition(&mut self, hash: SecureHash) -> TransitionResult {
        if self.starting_state.is_waiting_for_future {
            return TransitionResult::unchanged(self.starting_state.clone());
        }
        let mut builder = self.builder();
        builder.current_state.is_waiting_for_future = true;
        builder.actions.push(Action::TrackTransaction { hash });
        builder.suspend()
    }

    fn execute_async_operation_transition(&mut self, operation_name: String) -> TransitionResult {
        if self.starting_state.is_waiting_for_future {
            return TransitionResult::unchanged(self.starting_state.clone());
        }
        let mut builder = self.builder();
        // The suspend count folds into the id so executing the same
        // operation at a later suspension point gets a fresh identity.
        let deduplication_id = format!(
            "{}:{}",
            self.context.flow_id,
            builder.current_state.checkpoint.checkpoint_state.number_of_suspends
        );
        builder.current_state.is_waiting_for_future = true;
        builder
            .actions
            .push(Action::ExecuteAsyncOperation { operation_name, deduplication_id });
        builder.suspend()
    }

    // ---- Queries ----

    fn get_flow_info_transition(&mut self, sessions: BTreeSet<SessionId>) -> TransitionResult {
        let mut builder = self.builder();
        // Uninitiated sessions must be kicked off to learn the peer's info.
        self.send_initial_session_messages_if_needed(&mut builder, &sessions);
        if builder.is_errored() {
            return builder.suspend();
        }
        let mut flow_infos = BTreeMap::new();
        for session_id in &sessions {
            match builder.current_state.checkpoint.sessions().get(session_id) {
                Some(SessionState::Initiated(initiated)) => {
                    flow_infos.insert(*session_id, initiated.peer_flow_info.clone());
                }
                _ => return builder.suspend(),
            }
        }
        builder.resume(ResumedValue::FlowInfos(flow_infos))
    }

    fn wait_for_session_confirmations_transition(&mut self) -> TransitionResult {
        let builder = self.builder();
        let any_initiating = builder
            .current_state
            .checkpoint
            .sessions()
            .values()
            .any(|session_state| matches!(session_state, SessionState::Initiating(_)));
        if any_initiating {
            builder.suspend()
        } else {
            builder.resume(ResumedValue::Unit)
        }
    }

    fn force_checkpoint_transition(&mut self) -> TransitionResult {
        self.builder().resume(ResumedValue::Unit)
    }

    // ---- Error collection ----

    fn collect_relevant_errors_to_throw(&mut self) -> (StateMachineState, Vec<FlowError>) {
        match self.request.clone() {
            FlowIoRequest::Send { session_to_message }
            | FlowIoRequest::SendAndReceive { session_to_message } => {
                let session_ids: Vec<SessionId> = session_to_message.keys().copied().collect();
                self.collect_errored_and_ended(&session_ids)
            }
            FlowIoRequest::Receive { sessions } | FlowIoRequest::GetFlowInfo { sessions } => {
                let session_ids: Vec<SessionId> = sessions.iter().copied().collect();
                self.collect_errored_and_ended(&session_ids)
            }
            FlowIoRequest::WaitForLedgerCommit { .. } => {
                let session_ids: Vec<SessionId> =
                    self.starting_state.checkpoint.sessions().keys().copied().collect();
                self.collect_errored_session_errors(&session_ids)
            }
            FlowIoRequest::CloseSessions { sessions } => {
                let session_ids: Vec<SessionId> = sessions.iter().copied().collect();
                let (new_state, mut errors) = self.collect_errored_session_errors(&session_ids);
                errors.extend(self.collect_uncloseable_sessions(&session_ids));
                (new_state, errors)
            }
            FlowIoRequest::WaitForSessionConfirmations => {
                let errors = self.collect_initiating_rejections();
                (self.starting_state.clone(), errors)
            }
            FlowIoRequest::Sleep { .. }
            | FlowIoRequest::ExecuteAsyncOperation { .. }
            | FlowIoRequest::ForceCheckpoint => (self.starting_state.clone(), Vec::new()),
        }
    }

    fn collect_errored_and_ended(
        &mut self,
        session_ids: &[SessionId],
    ) -> (StateMachineState, Vec<FlowError>) {
        let (new_state, mut errors) = self.collect_errored_session_errors(session_ids);
        errors.extend(self.collect_ended_session_errors(session_ids));
        (new_state, errors)
    }

    /// Errors already delivered by peers: a rejected initiation, or an error
    /// message sitting at the next in-order position of an initiated
    /// session. Extracting the error message advances the session and marks
    /// the peer as errored, so the same error is not thrown twice.
    fn collect_errored_session_errors(
        &mut self,
        session_ids: &[SessionId],
    ) -> (StateMachineState, Vec<FlowError>) {
        let mut new_state = self.starting_state.clone();
        let mut errors = Vec::new();
        for session_id in session_ids {
            let Some(session_state) = self.starting_state.checkpoint.sessions().get(session_id)
            else {
                continue;
            };
            match session_state {
                SessionState::Uninitiated(_) => {}
                SessionState::Initiating(initiating) => {
                    if let Some(rejection) = &initiating.rejection_error {
                        errors.push(rejection.clone());
                    }
                }
                SessionState::Initiated(initiated) => {
                    if !initiated.has_errored() {
                        continue;
                    }
                    let (message, mut advanced) =
                        initiated.extract_message().expect("next message has arrived");
                    let ExistingSessionMessagePayload::Error(error_message) = message else {
                        unreachable!("has_errored guarantees the next message is an error")
                    };
                    advanced.other_side_errored = true;
                    new_state.checkpoint = new_state
                        .checkpoint
                        .add_session((*session_id, SessionState::Initiated(advanced)));
                    errors.push(convert_error_message(error_message, &initiated.peer_party));
                }
            }
        }
        (new_state, errors)
    }

    /// Accessing a session that is gone from the checkpoint means the peer
    /// ended it and it was already cleaned up.
    fn collect_ended_session_errors(&mut self, session_ids: &[SessionId]) -> Vec<FlowError> {
        let mut errors = Vec::new();
        for session_id in session_ids {
            if self.starting_state.checkpoint.sessions().contains_key(session_id) {
                continue;
            }
            errors.push(FlowError::UnexpectedFlowEnd {
                message: format!("tried to access ended session {session_id}"),
                error_id: self.next_error_id(),
                peer: None,
            });
        }
        errors
    }

    fn collect_uncloseable_sessions(&mut self, session_ids: &[SessionId]) -> Vec<FlowError> {
        session_ids
            .iter()
            .filter_map(|session_id| {
                match self.starting_state.checkpoint.sessions().get(session_id) {
                    Some(SessionState::Initiated(_)) | None => None,
                    Some(_) => {
                        Some(FlowError::PrematureSessionClose { session_id: *session_id })
                    }
                }
            })
            .collect()
    }

    fn collect_initiating_rejections(&self) -> Vec<FlowError> {
        self.starting_state
            .checkpoint
            .sessions()
            .values()
            .filter_map(|session_state| match session_state {
                SessionState::Initiating(initiating) => initiating.rejection_error.clone(),
                _ => None,
            })
            .collect()
    }
}

fn initial_session_message(
    uninitiated: &UninitiatedSessionState,
    session_id: SessionId,
    first_payload: Option<Payload>,
) -> InitialSessionMessage {
    InitialSessionMessage {
        initiator_session_id: session_id,
        initiation_entropy: uninitiated.additional_entropy,
        initiator_flow_name: uninitiated.initiating_flow_name.clone(),
        flow_version: uninitiated.flow_info.flow_version,
        app_name: uninitiated.flow_info.app_name.clone(),
        first_payload,
    }
}

fn convert_error_message(error_message: ErrorSessionMessage, peer: &Party) -> FlowError {
    match error_message.flow_error {
        None => FlowError::UnexpectedFlowEnd {
            message: "counter-flow errored".to_owned(),
            error_id: error_message.error_id,
            peer: Some(peer.clone()),
        },
        Some(FlowError::Application { message, .. }) => FlowError::Application {
            message,
            error_id: error_message.error_id,
            peer: Some(peer.clone()),
        },
        Some(other) => other,
    }
}

/// The unconditional post-step: sessions the peer asked to close whose end
/// message has been fully received are pruned from the checkpoint and their
/// routing bindings removed, whatever the request kind was.
fn terminate_sessions_if_required(result: TransitionResult) -> TransitionResult {
    let to_terminate: BTreeSet<SessionId> = result
        .new_state
        .checkpoint
        .checkpoint_state
        .sessions_to_be_closed
        .iter()
        .filter(|session_id| {
            matches!(
                result.new_state.checkpoint.sessions().get(session_id),
                Some(SessionState::Initiated(initiated)) if initiated.next_message_is_end()
            )
        })
        .copied()
        .collect();
    if to_terminate.is_empty() {
        return result;
    }
    let mut new_state = result.new_state;
    new_state.checkpoint = new_state.checkpoint.remove_sessions(&to_terminate);
    let mut actions = result.actions;
    actions.push(Action::RemoveSessionBindings { session_ids: to_terminate });
    TransitionResult { new_state, actions, continuation: result.continuation }
}
