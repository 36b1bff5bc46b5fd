// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! The flow transition engine: a pure function from (checkpointed state,
//! suspended I/O request) to (new state, actions, continuation). The engine
//! performs no I/O and reads no ambient state, so replaying a persisted
//! checkpoint after a restart computes exactly the same transition.

pub mod action;
pub mod context;
pub mod transition;

#[cfg(test)]
#[path = "unit_tests/mod.rs"]
mod unit_tests;
