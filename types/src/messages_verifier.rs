// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wire protocol between a node and its external verifier process.
//!
//! After the connection is established the node sends exactly one
//! `Initialisation`, then repeats: one `VerificationRequest`, answered by
//! zero or more `VerifierRequest`s (each of which the node must answer with
//! the matching `*Result` before the verifier proceeds), terminated by
//! exactly one `VerificationResult`. Framing is a u32 big-endian length
//! prefix followed by that many bytes of BCS.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::contracts::{SerializedTransactionState, StateRef};
use crate::crypto::PublicKeyBytes;
use crate::digests::SecureHash;
use crate::error::{TesseraError, TesseraResult};
use crate::identity::Party;
use crate::network_parameters::{NetworkParameters, SerializedNetworkParameters};
use crate::transaction::SignedTransaction;

/// An attachment bundled with the node's trust verdict, so the verifier
/// process never needs a second round-trip to learn it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentWithTrust {
    pub attachment: Attachment,
    pub is_trusted: bool,
}

/// Messages flowing from the node into the verifier process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalVerifierInbound {
    /// Sent once, before any verification request.
    Initialisation {
        custom_serializer_class_names: BTreeSet<String>,
        serialization_whitelist_class_names: BTreeSet<String>,
        custom_serialization_scheme_class_name: Option<String>,
        serialized_current_network_parameters: SerializedNetworkParameters,
    },
    VerificationRequest {
        stx: SignedTransaction,
        /// Input and reference states are eagerly shipped with the request;
        /// by definition inputs are unique to the transaction so there is no
        /// caching value in fetching them lazily.
        stx_inputs_and_references: BTreeMap<StateRef, SerializedTransactionState>,
        check_sufficient_signatures: bool,
    },
    PartiesResult {
        parties: Vec<Option<Party>>,
    },
    AttachmentResult {
        attachment: Option<AttachmentWithTrust>,
    },
    AttachmentsResult {
        attachments: Vec<Option<AttachmentWithTrust>>,
    },
    NetworkParametersResult {
        network_parameters: Option<NetworkParameters>,
    },
    /// Returns only the id; the verifier fetches the attachment itself via
    /// `GetAttachment` if it does not already hold it.
    TrustedClassAttachmentResult {
        id: Option<SecureHash>,
    },
}

/// Lookups the verifier process needs answered before it can proceed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifierRequest {
    GetParties { keys: BTreeSet<PublicKeyBytes> },
    GetAttachment { id: SecureHash },
    GetAttachments { ids: BTreeSet<SecureHash> },
    GetNetworkParameters { id: SecureHash },
    GetTrustedClassAttachment { class_name: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationResult {
    Success,
    Failure { error: TesseraError },
}

/// Messages flowing from the verifier process back to the node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalVerifierOutbound {
    Request(VerifierRequest),
    Result(VerificationResult),
}

/// Writes one length-prefixed message and flushes.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> TesseraResult {
    let bytes = bcs::to_bytes(message)?;
    writer.write_all(&(bytes.len() as u32).to_be_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed message, failing on a short read.
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> TesseraResult<T> {
    match read_message_or_eof(reader)? {
        Some(message) => Ok(message),
        None => Err(TesseraError::ExternalVerifierConnection {
            message: "connection closed while waiting for a message".to_owned(),
        }),
    }
}

/// Reads one length-prefixed message, returning `None` on a clean
/// end-of-stream (no bytes of the next frame read yet).
pub fn read_message_or_eof<R: Read, T: DeserializeOwned>(reader: &mut R) -> TesseraResult<Option<T>> {
    let mut length_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < length_bytes.len() {
        let n = reader.read(&mut length_bytes[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TesseraError::ExternalVerifierConnection {
                message: "connection closed mid-frame".to_owned(),
            });
        }
        filled += n;
    }
    let length = u32::from_be_bytes(length_bytes) as usize;
    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer)?;
    Ok(Some(bcs::from_bytes(&buffer)?))
}
