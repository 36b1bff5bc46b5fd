// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;

use crate::digests::{HashAlgorithm, SecureHash};

#[test]
fn compute_is_deterministic_per_algorithm() {
    let a = SecureHash::compute(HashAlgorithm::Blake2b256, b"tessera");
    let b = SecureHash::compute(HashAlgorithm::Blake2b256, b"tessera");
    let c = SecureHash::compute(HashAlgorithm::Sha256, b"tessera");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(c.algorithm(), HashAlgorithm::Sha256);
}

#[test]
fn re_hash_preserves_algorithm_and_changes_digest() {
    let hash = SecureHash::compute(HashAlgorithm::Sha256, b"payload");
    let rehashed = hash.re_hash();
    assert_eq!(rehashed.algorithm(), HashAlgorithm::Sha256);
    assert_ne!(rehashed, hash);
    // Re-hashing is itself deterministic.
    assert_eq!(rehashed, hash.re_hash());
}

#[test]
fn display_round_trips_through_from_str() {
    let hash = SecureHash::compute(HashAlgorithm::Sha256, b"round trip");
    let parsed = SecureHash::from_str(&hash.to_string()).unwrap();
    assert_eq!(parsed, hash);
}

#[test]
fn from_str_rejects_bad_input() {
    assert!(SecureHash::from_str("MD5:0011").is_err());
    assert!(SecureHash::from_str("SHA256:zz").is_err());
    assert!(SecureHash::from_str("SHA256:0011").is_err());
}

#[test]
fn random_hashes_carry_the_requested_algorithm() {
    let a = SecureHash::random();
    let b = SecureHash::random();
    assert_ne!(a, b);
    assert_eq!(a.algorithm(), HashAlgorithm::default());

    let sha = SecureHash::generate(HashAlgorithm::Sha256, rand::thread_rng());
    assert_eq!(sha.algorithm(), HashAlgorithm::Sha256);
}

#[test]
fn prefix_chars_truncates_hex() {
    let hash = SecureHash::compute(HashAlgorithm::default(), b"x");
    let prefix = hash.prefix_chars(6);
    assert_eq!(prefix.len(), 6);
    assert!(hash.to_string().contains(&prefix));
}
