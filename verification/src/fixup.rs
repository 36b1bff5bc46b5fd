// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node-local attachment fix-up rules.
//!
//! A rule substitutes a known-good set of attachment ids for a known-broken
//! historical one. Rules are applied in declaration order; a rule fires only
//! when its entire source set is present.
//!
//! The text format is one rule per line, `source => target`, with ids
//! comma-separated and `#` starting a comment:
//!
//! ```text
//! # replace the broken 1.0 token contract with the repackaged build
//! SHA256:aa..,SHA256:bb.. => SHA256:cc..
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use tracing::info;

use types::digests::SecureHash;
use types::error::{TesseraError, TesseraResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixupRule {
    pub source: BTreeSet<SecureHash>,
    pub target: BTreeSet<SecureHash>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachmentFixups {
    rules: Vec<FixupRule>,
}

impl AttachmentFixups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, source: BTreeSet<SecureHash>, target: BTreeSet<SecureHash>) {
        self.rules.push(FixupRule { source, target });
    }

    pub fn rules(&self) -> &[FixupRule] {
        &self.rules
    }

    pub fn parse(text: &str) -> TesseraResult<Self> {
        let mut fixups = Self::new();
        for (line_number, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (source, target) = line.split_once("=>").ok_or_else(|| TesseraError::Parse {
                message: format!("fix-up rule on line {} is missing '=>'", line_number + 1),
            })?;
            let source = parse_ids(source)?;
            let target = parse_ids(target)?;
            if source.is_empty() {
                return Err(TesseraError::Parse {
                    message: format!("fix-up rule on line {} has an empty source", line_number + 1),
                });
            }
            fixups.add_rule(source, target);
        }
        Ok(fixups)
    }

    /// Loads and merges every `*.txt` rule file in `dir`. A missing directory
    /// simply yields no rules.
    pub fn load_from_dir(dir: &Path) -> TesseraResult<Self> {
        let mut fixups = Self::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(fixups),
        };
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
            .collect();
        paths.sort();
        for path in paths {
            let text = std::fs::read_to_string(&path).map_err(|e| TesseraError::Parse {
                message: format!("cannot read fix-up file {}: {e}", path.display()),
            })?;
            let parsed = Self::parse(&text)?;
            info!(file = %path.display(), rules = parsed.rules.len(), "loaded attachment fix-up rules");
            fixups.rules.extend(parsed.rules);
        }
        Ok(fixups)
    }

    /// Applies every matching rule to the id set.
    pub fn fixup_attachment_ids(&self, ids: &[SecureHash]) -> BTreeSet<SecureHash> {
        let mut set: BTreeSet<SecureHash> = ids.iter().copied().collect();
        for rule in &self.rules {
            if rule.source.is_subset(&set) {
                for id in &rule.source {
                    set.remove(id);
                }
                set.extend(rule.target.iter().copied());
            }
        }
        set
    }
}

fn parse_ids(text: &str) -> TesseraResult<BTreeSet<SecureHash>> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(SecureHash::from_str)
        .collect()
}
