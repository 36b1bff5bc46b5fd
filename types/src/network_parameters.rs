// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::contracts::SerializedBytes;
use crate::TimestampMs;

/// Network-wide configuration values, referenced by hash from each
/// transaction. The `epoch` increases on every change; verification enforces
/// that epochs never decrease along a transaction's input lineage.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkParameters {
    pub min_platform_version: u32,
    pub epoch: u32,
    pub modified_time: TimestampMs,
    pub max_message_size: u32,
    pub max_transaction_size: u32,
}

pub type SerializedNetworkParameters = SerializedBytes<NetworkParameters>;
