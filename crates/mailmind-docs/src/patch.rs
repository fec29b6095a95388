//! Pure line patcher for the singleton documents. `(doc, patch) ->
//! new_doc | error`; persistence and notification live in the manager.

use thiserror::Error;

use mailmind_core::types::Classification;

use crate::normalize::{canonical_bullet, compare_key};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch contains no operations")]
    Empty,

    #[error("operation is missing its action type")]
    MissingActionType,

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("section header for `{0}` not found")]
    SectionMissing(Classification),

    #[error("delete target not found: {0}")]
    DeleteTargetMissing(String),
}

impl From<PatchError> for mailmind_core::MailmindError {
    fn from(e: PatchError) -> Self {
        mailmind_core::MailmindError::Patch(e.to_string())
    }
}

/// Which singleton document a patch addresses. Action patches carry an
/// action type per operation and insert into sections; KB patches append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchTarget {
    ActionRules,
    KnowledgeBase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Del,
}

#[derive(Debug, Clone)]
pub struct PatchOp {
    pub kind: OpKind,
    /// Present for action-document patches only.
    pub action: Option<Classification>,
    /// Content lines; blank lines dropped at parse.
    pub lines: Vec<String>,
}

/// Parse a plain-text patch: a sequence of `ADD`/`DEL` blocks, each block
/// running until the next opcode line. For action patches, the line after
/// the opcode names the action type.
pub fn parse_patch(text: &str, target: PatchTarget) -> Result<Vec<PatchOp>, PatchError> {
    let mut ops: Vec<PatchOp> = Vec::new();
    let mut current: Option<PatchOp> = None;
    let mut expect_action = false;

    for raw_line in text.lines() {
        let line = raw_line.trim_end();
        match line.trim() {
            "ADD" | "DEL" => {
                if let Some(op) = current.take() {
                    ops.push(finish_op(op)?);
                }
                let kind = if line.trim() == "ADD" { OpKind::Add } else { OpKind::Del };
                current = Some(PatchOp {
                    kind,
                    action: None,
                    lines: Vec::new(),
                });
                expect_action = target == PatchTarget::ActionRules;
            }
            "" => {}
            content => {
                let Some(op) = current.as_mut() else {
                    // Content before the first opcode is not a patch.
                    return Err(PatchError::Empty);
                };
                if expect_action {
                    op.action = Some(
                        content
                            .parse::<Classification>()
                            .map_err(|_| PatchError::UnknownActionType(content.to_string()))?,
                    );
                    expect_action = false;
                } else {
                    op.lines.push(content.to_string());
                }
            }
        }
    }
    if let Some(op) = current.take() {
        ops.push(finish_op(op)?);
    }
    if ops.is_empty() {
        return Err(PatchError::Empty);
    }
    Ok(ops)
}

fn finish_op(op: PatchOp) -> Result<PatchOp, PatchError> {
    if op.action.is_none() && op.lines.is_empty() {
        // An ADD/DEL with nothing after it is malformed either way.
        return Err(PatchError::Empty);
    }
    Ok(op)
}

/// Apply a patch text to a document. All-or-nothing: the first failing
/// operation aborts the whole application and the caller keeps the
/// original document.
pub fn apply_patch(doc: &str, patch: &str, target: PatchTarget) -> Result<String, PatchError> {
    let ops = parse_patch(patch, target)?;
    let mut lines: Vec<String> = doc.lines().map(String::from).collect();

    for op in &ops {
        if target == PatchTarget::ActionRules && op.action.is_none() {
            return Err(PatchError::MissingActionType);
        }
        for content in &op.lines {
            match op.kind {
                OpKind::Add => add_line(&mut lines, content, op.action, target)?,
                OpKind::Del => del_line(&mut lines, content)?,
            }
        }
    }

    let mut out = lines.join("\n");
    if doc.ends_with('\n') && !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

fn add_line(
    lines: &mut Vec<String>,
    content: &str,
    action: Option<Classification>,
    target: PatchTarget,
) -> Result<(), PatchError> {
    let bullet = canonical_bullet(content);
    let key = compare_key(content);

    match target {
        PatchTarget::ActionRules => {
            let action = action.expect("checked by apply_patch");
            let header_idx = lines
                .iter()
                .position(|l| is_section_header(l, action))
                .ok_or(PatchError::SectionMissing(action))?;
            let next_header = lines[header_idx + 1..]
                .iter()
                .position(|l| l.starts_with("# "))
                .map(|i| header_idx + 1 + i)
                .unwrap_or(lines.len());

            // Duplicate within the section is a silent no-op.
            if lines[header_idx..next_header]
                .iter()
                .any(|l| is_bullet(l) && compare_key(l) == key)
            {
                return Ok(());
            }

            // Section tail: after the last non-blank line, before the next
            // header.
            let mut insert_at = next_header;
            while insert_at > header_idx + 1 && lines[insert_at - 1].trim().is_empty() {
                insert_at -= 1;
            }
            lines.insert(insert_at, bullet);
            Ok(())
        }
        PatchTarget::KnowledgeBase => {
            if lines.iter().any(|l| is_bullet(l) && compare_key(l) == key) {
                return Ok(());
            }
            // Append after the last non-blank line.
            let mut insert_at = lines.len();
            while insert_at > 0 && lines[insert_at - 1].trim().is_empty() {
                insert_at -= 1;
            }
            lines.insert(insert_at, bullet);
            Ok(())
        }
    }
}

fn del_line(lines: &mut Vec<String>, content: &str) -> Result<(), PatchError> {
    let key = compare_key(content);
    let idx = lines
        .iter()
        .position(|l| is_bullet(l) && compare_key(l) == key)
        .ok_or_else(|| PatchError::DeleteTargetMissing(content.to_string()))?;
    lines.remove(idx);
    Ok(())
}

fn is_bullet(line: &str) -> bool {
    line.trim_start().starts_with("- ")
}

/// Section headers look like:
/// `# Emails to be marked as \`archive\` (DO NOT EDIT/DELETE THIS SECTION HEADER)`
fn is_section_header(line: &str, action: Classification) -> bool {
    line.starts_with("# ") && line.contains(&format!("`{action}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTION_DOC: &str = "# Emails to be marked as `delete` (DO NOT EDIT/DELETE THIS SECTION HEADER)\n\n# Emails to be marked as `archive` (DO NOT EDIT/DELETE THIS SECTION HEADER)\n- Old rule.\n\n# Emails to be marked as `reply` (DO NOT EDIT/DELETE THIS SECTION HEADER)\n\n# Emails to be marked as `none` (DO NOT EDIT/DELETE THIS SECTION HEADER)\n";

    #[test]
    fn add_into_section_tail() {
        let out = apply_patch(
            ACTION_DOC,
            "ADD\narchive\n- Newsletters from acme.",
            PatchTarget::ActionRules,
        )
        .unwrap();
        let archive_idx = out.find("`archive`").unwrap();
        let reply_idx = out.find("`reply`").unwrap();
        let section = &out[archive_idx..reply_idx];
        assert!(section.contains("- Old rule.\n- Newsletters from acme."));
    }

    #[test]
    fn duplicate_add_is_noop() {
        let once = apply_patch(
            ACTION_DOC,
            "ADD\narchive\n- Newsletters from acme.",
            PatchTarget::ActionRules,
        )
        .unwrap();
        let twice = apply_patch(
            &once,
            "ADD\narchive\nNewsletters from acme",
            PatchTarget::ActionRules,
        )
        .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn add_then_del_round_trips() {
        let added = apply_patch(
            ACTION_DOC,
            "ADD\narchive\n- Temp rule.",
            PatchTarget::ActionRules,
        )
        .unwrap();
        let removed = apply_patch(
            &added,
            "DEL\narchive\n- Temp rule.",
            PatchTarget::ActionRules,
        )
        .unwrap();
        assert_eq!(removed, ACTION_DOC);
    }

    #[test]
    fn del_is_period_agnostic() {
        let out = apply_patch(
            ACTION_DOC,
            "DEL\narchive\nold rule",
            PatchTarget::ActionRules,
        )
        .unwrap();
        assert!(!out.contains("Old rule"));
    }

    #[test]
    fn del_missing_target_errors() {
        let err = apply_patch(
            ACTION_DOC,
            "DEL\narchive\n- Not there.",
            PatchTarget::ActionRules,
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::DeleteTargetMissing(_)));
    }

    #[test]
    fn unknown_action_type_invalidates() {
        let err = apply_patch(
            ACTION_DOC,
            "ADD\nshred\n- Something.",
            PatchTarget::ActionRules,
        )
        .unwrap_err();
        assert_eq!(err, PatchError::UnknownActionType("shred".to_string()));
    }

    #[test]
    fn missing_section_fails_whole_patch() {
        let doc = "# Emails to be marked as `delete` (DO NOT EDIT/DELETE THIS SECTION HEADER)\n";
        let err = apply_patch(doc, "ADD\narchive\n- X.", PatchTarget::ActionRules).unwrap_err();
        assert_eq!(err, PatchError::SectionMissing(Classification::Archive));
    }

    #[test]
    fn kb_add_appends_at_end() {
        let doc = "# Knowledge\n- Known fact.\n";
        let out = apply_patch(doc, "ADD\n- New fact", PatchTarget::KnowledgeBase).unwrap();
        assert!(out.ends_with("- Known fact.\n- New fact.\n"));
    }

    #[test]
    fn kb_duplicate_add_is_noop_under_normalization() {
        let doc = "# Knowledge\n- Known fact.\n";
        let out = apply_patch(doc, "ADD\nKNOWN FACT", PatchTarget::KnowledgeBase).unwrap();
        assert_eq!(out, doc);
    }

    #[test]
    fn multiple_ops_apply_sequentially() {
        let doc = "# Knowledge\n- A.\n";
        let out = apply_patch(
            doc,
            "ADD\n- B.\nDEL\n- A.",
            PatchTarget::KnowledgeBase,
        )
        .unwrap();
        assert!(out.contains("- B."));
        assert!(!out.contains("- A."));
    }

    #[test]
    fn empty_patch_rejected() {
        assert_eq!(
            apply_patch("doc", "", PatchTarget::KnowledgeBase).unwrap_err(),
            PatchError::Empty
        );
    }
}
