// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use types::digests::SecureHash;
use types::flow::FlowId;

/// The inputs a transition needs beyond the checkpointed state. Everything a
/// transition could want from its environment is injected here, so a
/// transition stays a pure function of (context, state, request): replaying
/// the same inputs yields byte-identical outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionContext {
    pub flow_id: FlowId,
    /// Seed for the error ids this transition mints itself. Supplied by the
    /// caller rather than drawn from a thread-local RNG, to keep replays
    /// deterministic.
    pub error_id_seed: u64,
}

impl TransitionContext {
    pub fn new(flow_id: FlowId, error_id_seed: u64) -> Self {
        Self { flow_id, error_id_seed }
    }

    /// The `ordinal`-th error id of this transition.
    pub fn error_id(&self, ordinal: u64) -> u64 {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.error_id_seed.to_be_bytes());
        bytes[8..].copy_from_slice(&ordinal.to_be_bytes());
        let digest = SecureHash::hash(bytes);
        u64::from_be_bytes(digest.inner()[..8].try_into().expect("digest is 32 bytes"))
    }
}
