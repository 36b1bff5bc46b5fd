// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Blocks database access for the duration of contract verification.
//!
//! Contract verification must be side-effect-free with respect to
//! persistence: a contract that reads the database would make verification
//! non-deterministic across nodes. The flag is per-thread; store
//! implementations consult [`is_db_access_allowed`] before touching their
//! backing database. The guard restores the previous value on drop, so access
//! comes back even when the inner verify unwinds.

use std::cell::Cell;

use crate::support::ContractVerifier;
use types::error::TesseraResult;

thread_local! {
    static DB_ACCESS_ALLOWED: Cell<bool> = const { Cell::new(true) };
}

pub fn is_db_access_allowed() -> bool {
    DB_ACCESS_ALLOWED.with(Cell::get)
}

/// Disables database access on the current thread until dropped.
pub struct NoDbAccessGuard {
    previous: bool,
}

impl NoDbAccessGuard {
    pub fn new() -> Self {
        let previous = DB_ACCESS_ALLOWED.with(|allowed| allowed.replace(false));
        Self { previous }
    }
}

impl Default for NoDbAccessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoDbAccessGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        DB_ACCESS_ALLOWED.with(|allowed| allowed.set(previous));
    }
}

/// Decorator that runs the wrapped verifier with database access disabled.
pub struct NoDbAccessVerifier<'a> {
    inner: &'a dyn ContractVerifier,
}

impl<'a> NoDbAccessVerifier<'a> {
    pub fn new(inner: &'a dyn ContractVerifier) -> Self {
        Self { inner }
    }
}

impl ContractVerifier for NoDbAccessVerifier<'_> {
    fn verify(&self) -> TesseraResult {
        let _guard = NoDbAccessGuard::new();
        self.inner.verify()
    }
}
