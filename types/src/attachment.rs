// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::digests::SecureHash;

/// Uploader tag for attachments installed locally alongside the node.
pub const DEPLOYED_APP_UPLOADER: &str = "app";
/// Uploader tag for attachments uploaded by an administrator over RPC.
pub const RPC_UPLOADER: &str = "rpc";
/// Uploader tag for attachments received from peers.
pub const P2P_UPLOADER: &str = "p2p";
pub const UNKNOWN_UPLOADER: &str = "unknown";

/// Uploaders whose attachments are trusted to supply contract code without
/// further checks. Everything else goes through the trust calculator.
pub const TRUSTED_UPLOADERS: &[&str] = &[DEPLOYED_APP_UPLOADER, RPC_UPLOADER];

/// A content-addressed code archive referenced by transactions. `entries`
/// lists the file paths inside the archive, which is all the class-presence
/// scan needs without unpacking `bytes`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attachment {
    pub id: SecureHash,
    pub uploader: Option<String>,
    pub version: u32,
    pub entries: Vec<String>,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn is_uploader_trusted(&self) -> bool {
        self.uploader
            .as_deref()
            .is_some_and(|uploader| TRUSTED_UPLOADERS.contains(&uploader))
    }

    /// Whether the archive carries the class file for a dotted class name.
    pub fn contains_class(&self, class_name: &str) -> bool {
        let path = format!("{}.class", class_name.replace('.', "/"));
        self.entries.iter().any(|entry| *entry == path)
    }
}

/// The attachment-store query shape the verification layer needs: filter by
/// uploader, optionally ordered by version descending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachmentQuery {
    pub uploaders: Option<Vec<String>>,
    pub version_descending: bool,
}

impl AttachmentQuery {
    /// Trusted uploaders only, highest version first. This is the query the
    /// trusted-class scan runs.
    pub fn trusted_by_version_desc() -> Self {
        Self {
            uploaders: Some(TRUSTED_UPLOADERS.iter().map(|s| (*s).to_owned()).collect()),
            version_descending: true,
        }
    }
}
