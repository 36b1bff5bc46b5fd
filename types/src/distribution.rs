// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Audit records of which peer was granted visibility of which transaction,
//! written at finality time and read back during ledger recovery.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::digests::SecureHash;
use crate::TimestampMs;

/// How much of a transaction's states the receiving peer records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatesToRecord {
    None,
    AllVisible,
    OnlyRelevant,
}

/// The sender's record of who was sent what, shipped (encrypted, by an outer
/// layer) alongside the transaction for the sender's sole later use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionList {
    pub sender_states_to_record: StatesToRecord,
    pub peers_to_states_to_record: BTreeMap<String, StatesToRecord>,
}

/// Composite record key. The sequence number disambiguates records created
/// within the same timestamp by concurrent flows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub timestamp: TimestampMs,
    pub sequence_number: u64,
}

/// Hands out record sequence numbers. One source per store, owned by the
/// persistence layer and passed by reference, never ambient.
#[derive(Debug, Default)]
pub struct RecordKeySource {
    next_sequence_number: AtomicU64,
}

impl RecordKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_key(&self, timestamp: TimestampMs) -> RecordKey {
        RecordKey {
            timestamp,
            sequence_number: self.next_sequence_number.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// One peer we sent a transaction to, and what they were asked to record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderDistributionRecord {
    pub tx_id: SecureHash,
    pub peer: String,
    pub states_to_record: StatesToRecord,
    pub timestamp: TimestampMs,
}

/// The receiving side's record of a state-visibility grant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverDistributionRecord {
    pub tx_id: SecureHash,
    pub initiator: String,
    pub peers_to_states_to_record: BTreeMap<String, StatesToRecord>,
    pub states_to_record: StatesToRecord,
    pub sender_states_to_record: StatesToRecord,
    pub timestamp: TimestampMs,
}
