// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use fastcrypto::ed25519::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
use fastcrypto::encoding::{Encoding, Hex};
use fastcrypto::error::FastCryptoError;
use fastcrypto::traits::{KeyPair, Signer, ToFromBytes, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::digests::SecureHash;
use crate::error::{TesseraError, TesseraResult};
use crate::merkle::PartialMerkleTree;
use crate::serde::Readable;

pub type PartyKeyPair = Ed25519KeyPair;
pub type PartyPublicKey = Ed25519PublicKey;
pub type PartySignature = Ed25519Signature;

pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Compressed public key bytes. Used wherever keys live inside serialized
/// values or act as map keys; converted back to a full `PartyPublicKey` only
/// at verification time.
#[serde_as]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKeyBytes(
    #[serde_as(as = "Readable<Hex, Bytes>")] pub [u8; PUBLIC_KEY_LENGTH],
);

impl PublicKeyBytes {
    pub const ZERO: Self = Self::new([0u8; PUBLIC_KEY_LENGTH]);

    pub const fn new(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// The first eight hex characters, for log lines and error messages.
    pub fn concise(&self) -> String {
        let mut s = Hex::encode(self.0);
        s.truncate(8);
        s
    }

    fn fmt_impl(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "k#{}", Hex::encode(self.0))
    }
}

impl TryFrom<PublicKeyBytes> for PartyPublicKey {
    type Error = FastCryptoError;

    fn try_from(bytes: PublicKeyBytes) -> Result<PartyPublicKey, Self::Error> {
        PartyPublicKey::from_bytes(&bytes.0)
    }
}

impl From<&PartyPublicKey> for PublicKeyBytes {
    fn from(pk: &PartyPublicKey) -> PublicKeyBytes {
        let bytes: [u8; PUBLIC_KEY_LENGTH] =
            pk.as_ref().try_into().expect("ed25519 public keys are 32 bytes");
        PublicKeyBytes(bytes)
    }
}

impl AsRef<[u8]> for PublicKeyBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.fmt_impl(f)
    }
}

impl Display for PublicKeyBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.fmt_impl(f)
    }
}

impl FromStr for PublicKeyBytes {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = Hex::decode(s)
            .map_err(|e| TesseraError::Parse { message: format!("invalid key hex: {e}") })?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| TesseraError::Parse { message: "key must be 32 bytes".to_owned() })?;
        Ok(PublicKeyBytes(bytes))
    }
}

impl Default for PublicKeyBytes {
    fn default() -> Self {
        Self::ZERO
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignatureScheme {
    Ed25519,
}

impl SignatureScheme {
    pub fn scheme_id(&self) -> u32 {
        match self {
            SignatureScheme::Ed25519 => 1,
        }
    }
}

/// Attached to every signature so a verifier knows which platform version and
/// key scheme produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureMetadata {
    pub platform_version: u32,
    pub scheme_id: u32,
}

impl SignatureMetadata {
    pub fn new(platform_version: u32, scheme: SignatureScheme) -> Self {
        Self { platform_version, scheme_id: scheme.scheme_id() }
    }
}

/// The value actually signed: a transaction id (or Merkle root, for batch
/// signatures) plus the signature metadata, canonically serialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignableData {
    pub tx_id: SecureHash,
    pub signature_metadata: SignatureMetadata,
}

impl SignableData {
    pub fn new(tx_id: SecureHash, signature_metadata: SignatureMetadata) -> Self {
        Self { tx_id, signature_metadata }
    }

    pub fn to_signable_bytes(&self) -> Vec<u8> {
        bcs::to_bytes(self).expect("serializing SignableData cannot fail")
    }
}

/// A signature over a transaction id, optionally carrying a partial Merkle
/// proof when the signature was actually made over the root of a batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub bytes: Vec<u8>,
    pub by: PublicKeyBytes,
    pub signature_metadata: SignatureMetadata,
    pub partial_merkle_tree: Option<PartialMerkleTree>,
}

impl TransactionSignature {
    pub fn new(bytes: Vec<u8>, by: PublicKeyBytes, signature_metadata: SignatureMetadata) -> Self {
        Self { bytes, by, signature_metadata, partial_merkle_tree: None }
    }

    pub fn with_proof(
        bytes: Vec<u8>,
        by: PublicKeyBytes,
        signature_metadata: SignatureMetadata,
        partial_merkle_tree: PartialMerkleTree,
    ) -> Self {
        Self { bytes, by, signature_metadata, partial_merkle_tree: Some(partial_merkle_tree) }
    }

    /// Checks this signature against `tx_id`. A plain signature must have
    /// been made over `tx_id` directly; a batch signature must have been made
    /// over the proof's root, with the re-hashed `tx_id` among the included
    /// leaves.
    pub fn verify(&self, tx_id: SecureHash) -> TesseraResult {
        let signed_over = match &self.partial_merkle_tree {
            Some(tree) => {
                let (root, included) = tree.root_and_included_leaves();
                if !included.contains(&tx_id.re_hash()) {
                    return Err(TesseraError::MerkleProof {
                        message: format!(
                            "transaction {tx_id} is not a leaf in the provided partial Merkle tree"
                        ),
                    });
                }
                root
            }
            None => tx_id,
        };
        let message =
            SignableData::new(signed_over, self.signature_metadata).to_signable_bytes();
        let key = PartyPublicKey::try_from(self.by)
            .map_err(|e| TesseraError::KeyConversion { error: e.to_string() })?;
        let signature = PartySignature::from_bytes(&self.bytes)
            .map_err(|e| TesseraError::InvalidSignature { error: e.to_string() })?;
        key.verify(&message, &signature)
            .map_err(|e| TesseraError::InvalidSignature { error: e.to_string() })
    }

    pub fn is_valid(&self, tx_id: SecureHash) -> bool {
        self.verify(tx_id).is_ok()
    }
}

/// Signs `data` with the given keypair, producing a proof-less signature.
pub fn sign_signable(keypair: &PartyKeyPair, data: &SignableData) -> TransactionSignature {
    let signature = keypair.sign(&data.to_signable_bytes());
    TransactionSignature::new(
        signature.as_ref().to_vec(),
        keypair.public().into(),
        data.signature_metadata,
    )
}

/// The canonical content hash of a serializable value under the default
/// algorithm.
pub fn default_hash<T: Serialize>(value: &T) -> SecureHash {
    let bytes = bcs::to_bytes(value).expect("serializing a hashable value cannot fail");
    SecureHash::hash(bytes)
}
