// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKeyBytes;

/// A well-known ledger identity: a display name bound to an owning key.
/// Key-to-party resolution is an identity-service concern; a `Party` value is
/// only ever constructed from a successful lookup.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub owning_key: PublicKeyBytes,
}

impl Party {
    pub fn new(name: impl Into<String>, owning_key: PublicKeyBytes) -> Self {
        Self { name: name.into(), owning_key }
    }
}

impl Display for Party {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
