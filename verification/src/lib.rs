// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

pub mod fixup;
pub mod no_db_access;
pub mod notary;
pub mod store_support;
pub mod support;
pub mod test_utils;
pub mod verifier;

#[cfg(test)]
#[path = "unit_tests/mod.rs"]
mod unit_tests;
