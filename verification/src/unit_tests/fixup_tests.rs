// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

use types::digests::SecureHash;

use crate::fixup::AttachmentFixups;

fn id(byte: u8) -> SecureHash {
    SecureHash::hash([byte])
}

fn ids(bytes: &[u8]) -> BTreeSet<SecureHash> {
    bytes.iter().map(|byte| id(*byte)).collect()
}

#[test]
fn rule_fires_only_when_entire_source_is_present() {
    let mut fixups = AttachmentFixups::new();
    fixups.add_rule(ids(&[1, 2]), ids(&[3]));

    // Only one of the two source ids is present, so nothing changes.
    let unchanged = fixups.fixup_attachment_ids(&[id(1), id(9)]);
    assert_eq!(unchanged, ids(&[1, 9]));

    let fixed = fixups.fixup_attachment_ids(&[id(1), id(2), id(9)]);
    assert_eq!(fixed, ids(&[3, 9]));
}

#[test]
fn rules_apply_in_declaration_order() {
    let mut fixups = AttachmentFixups::new();
    fixups.add_rule(ids(&[1]), ids(&[2]));
    // Fires only because the first rule put 2 into the set.
    fixups.add_rule(ids(&[2]), ids(&[3]));

    let fixed = fixups.fixup_attachment_ids(&[id(1)]);
    assert_eq!(fixed, ids(&[3]));
}

#[test]
fn parse_accepts_comments_and_blank_lines() {
    let a = id(1);
    let b = id(2);
    let c = id(3);
    let text = format!(
        "# replace the broken build\n\n{a},{b} => {c} # trailing comment\n"
    );

    let fixups = AttachmentFixups::parse(&text).unwrap();
    assert_eq!(fixups.rules().len(), 1);
    assert_eq!(fixups.fixup_attachment_ids(&[a, b]), ids(&[3]));
}

#[test]
fn parse_rejects_missing_arrow_and_empty_source() {
    assert!(AttachmentFixups::parse("deadbeef").is_err());
    assert!(AttachmentFixups::parse(&format!(" => {}", id(1))).is_err());
}

#[test]
fn rule_may_drop_attachments_entirely() {
    let mut fixups = AttachmentFixups::new();
    fixups.add_rule(ids(&[1]), BTreeSet::new());

    let fixed = fixups.fixup_attachment_ids(&[id(1), id(2)]);
    assert_eq!(fixed, ids(&[2]));
}
