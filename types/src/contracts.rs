// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKeyBytes;
use crate::digests::SecureHash;
use crate::error::TesseraResult;
use crate::identity::Party;

/// Canonically serialized bytes of a `T`, kept opaque until explicitly
/// deserialized. Hashes and signatures are computed over these bytes, so two
/// values are equal exactly when their serialized forms are.
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializedBytes<T> {
    bytes: Vec<u8>,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerializedBytes<T> {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, _marker: PhantomData }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content hash of the serialized form, under the default algorithm.
    pub fn hash(&self) -> SecureHash {
        SecureHash::hash(&self.bytes)
    }
}

impl<T: Serialize> SerializedBytes<T> {
    pub fn serialize(value: &T) -> TesseraResult<Self> {
        Ok(Self::from_bytes(bcs::to_bytes(value)?))
    }
}

impl<T: DeserializeOwned> SerializedBytes<T> {
    pub fn deserialize(&self) -> TesseraResult<T> {
        Ok(bcs::from_bytes(&self.bytes)?)
    }
}

impl<T> Clone for SerializedBytes<T> {
    fn clone(&self) -> Self {
        Self::from_bytes(self.bytes.clone())
    }
}

impl<T> PartialEq for SerializedBytes<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<T> Eq for SerializedBytes<T> {}

impl<T> Hash for SerializedBytes<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl<T> PartialOrd for SerializedBytes<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for SerializedBytes<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl<T> Debug for SerializedBytes<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SerializedBytes({} bytes, {})", self.bytes.len(), self.hash().prefix_chars(8))
    }
}

/// A pointer to an output state of a previous transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    pub txhash: SecureHash,
    pub index: u32,
}

impl StateRef {
    pub fn new(txhash: SecureHash, index: u32) -> Self {
        Self { txhash, index }
    }
}

impl Display for StateRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.txhash, self.index)
    }
}

/// A contract state as it appears on the ledger: the opaque state payload
/// wrapped with the contract that governs it, the parties it belongs to and
/// the notary that prevents its double-spend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionState {
    pub contract: String,
    pub notary: Party,
    pub participants: Vec<PublicKeyBytes>,
    pub data: Vec<u8>,
}

pub type SerializedTransactionState = SerializedBytes<TransactionState>;

/// A resolved input: the state a `StateRef` points at.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateAndRef {
    pub state: TransactionState,
    pub reference: StateRef,
}

/// The not-yet-deserialized form of `StateAndRef`, as shipped to the external
/// verifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerializedStateAndRef {
    pub serialized_state: SerializedTransactionState,
    pub reference: StateRef,
}

impl SerializedStateAndRef {
    pub fn to_state_and_ref(&self) -> TesseraResult<StateAndRef> {
        Ok(StateAndRef { state: self.serialized_state.deserialize()?, reference: self.reference })
    }
}

/// A command names an action the transaction performs and the keys that must
/// sign for it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub signers: Vec<PublicKeyBytes>,
}

impl Command {
    pub fn new(name: impl Into<String>, signers: Vec<PublicKeyBytes>) -> Self {
        Self { name: name.into(), signers }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let signers: Vec<String> = self.signers.iter().map(|key| key.concise()).collect();
        write!(f, "Command({}, signers=[{}])", self.name, signers.join(", "))
    }
}
