// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use fastcrypto::encoding::{Encoding, Hex};
use fastcrypto::hash::{Blake2b256, HashFunction, Sha256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::error::TesseraError;
use crate::serde::Readable;

/// The digest families a transaction id may be computed with. A single
/// transaction lineage may mix families, but a notary batch may not.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug, Default,
)]
pub enum HashAlgorithm {
    #[default]
    Blake2b256,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake2b256 => "BLAKE2B256",
            HashAlgorithm::Sha256 => "SHA256",
        }
    }

    pub fn digest(&self, data: impl AsRef<[u8]>) -> [u8; 32] {
        match self {
            HashAlgorithm::Blake2b256 => Blake2b256::digest(data).into(),
            HashAlgorithm::Sha256 => Sha256::digest(data).into(),
        }
    }
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An algorithm-tagged 32 byte content hash. Transaction ids, attachment ids
/// and network-parameter hashes are all `SecureHash`es.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecureHash {
    algorithm: HashAlgorithm,
    #[serde_as(as = "Readable<Hex, Bytes>")]
    digest: [u8; 32],
}

impl SecureHash {
    pub const fn new(algorithm: HashAlgorithm, digest: [u8; 32]) -> Self {
        Self { algorithm, digest }
    }

    pub const fn zero(algorithm: HashAlgorithm) -> Self {
        Self { algorithm, digest: [0; 32] }
    }

    /// Hashes `data` with the given algorithm.
    pub fn compute(algorithm: HashAlgorithm, data: impl AsRef<[u8]>) -> Self {
        Self { algorithm, digest: algorithm.digest(data) }
    }

    /// Hashes `data` with the default algorithm.
    pub fn hash(data: impl AsRef<[u8]>) -> Self {
        Self::compute(HashAlgorithm::default(), data)
    }

    /// The digest of this digest, under the same algorithm. Notary batch
    /// signing hashes each id once more before building the Merkle tree so
    /// that the signed tree never contains a raw transaction id as a leaf.
    pub fn re_hash(&self) -> Self {
        Self::compute(self.algorithm, self.digest)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub const fn inner(&self) -> &[u8; 32] {
        &self.digest
    }

    /// The first `n` hex characters, for log lines and error messages.
    pub fn prefix_chars(&self, n: usize) -> String {
        let mut s = Hex::encode(self.digest);
        s.truncate(n);
        s
    }

    pub fn generate<R: rand::RngCore + rand::CryptoRng>(algorithm: HashAlgorithm, mut rng: R) -> Self {
        let mut digest = [0; 32];
        rng.fill_bytes(&mut digest);
        Self { algorithm, digest }
    }

    pub fn random() -> Self {
        Self::generate(HashAlgorithm::default(), rand::thread_rng())
    }
}

impl AsRef<[u8]> for SecureHash {
    fn as_ref(&self) -> &[u8] {
        &self.digest
    }
}

impl Display for SecureHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, Hex::encode(self.digest))
    }
}

impl Debug for SecureHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for SecureHash {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = match s.split_once(':') {
            Some(("BLAKE2B256", rest)) => (HashAlgorithm::Blake2b256, rest),
            Some(("SHA256", rest)) => (HashAlgorithm::Sha256, rest),
            Some((other, _)) => {
                return Err(TesseraError::Parse { message: format!("unknown hash algorithm {other}") })
            }
            None => (HashAlgorithm::default(), s),
        };
        let bytes = Hex::decode(hex)
            .map_err(|e| TesseraError::Parse { message: format!("invalid hash hex: {e}") })?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TesseraError::Parse { message: "hash must be 32 bytes".to_owned() })?;
        Ok(Self { algorithm, digest })
    }
}
