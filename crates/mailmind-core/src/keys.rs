//! Persisted key layout. Every record the core writes lives under one of
//! these keys or prefixes; prefix scans and the purge pass depend on the
//! `<kind>:` / `<kind>:ts:` shape staying exactly as written here.

use crate::types::{ArtifactKind, Fingerprint};

pub const ACTION_RULES_DOC: &str = "user_prompts:user_action.md";
pub const USER_KB_DOC: &str = "user_prompts:user_kb.md";

pub const REMINDER_KB_LIST: &str = "reminder_kb_list";
pub const DISABLED_REMINDERS: &str = "disabled_reminders";

pub const CHECKIN_REMINDER_HASH: &str = "proactiveCheckin_reminderHash";
pub const CHECKIN_PENDING_MESSAGE: &str = "proactiveCheckin_pendingMessage";
pub const CHECKIN_LAST_RUN: &str = "proactiveCheckin_lastCheckin";

pub const PROACTIVE_ENABLED: &str = "notifications.proactive_enabled";
pub const NEW_REMINDER_WINDOW_DAYS: &str = "notifications.new_reminder_window_days";
pub const DUE_REMINDER_ADVANCE_MINUTES: &str = "notifications.due_reminder_advance_minutes";
pub const GRACE_MINUTES: &str = "notifications.grace_minutes";

/// Prefix of the persistent processor-queue records.
pub const QUEUE_PREFIX: &str = "queue:";

/// Artifact payload key: `<kind>:<fp>`.
pub fn payload_key(kind: ArtifactKind, fp: &Fingerprint) -> String {
    format!("{kind}:{fp}")
}

/// Artifact meta (last-touched) key: `<kind>:ts:<fp>`.
pub fn meta_key(kind: ArtifactKind, fp: &Fingerprint) -> String {
    format!("{kind}:ts:{fp}")
}

/// Payload prefix for purge passes, `<kind>:`.
///
/// Note this prefix also covers the matching `<kind>:ts:` keys, so a purge
/// over `[payload_prefix(k)]` sweeps payloads and metas in one pass.
pub fn payload_prefix(kind: ArtifactKind) -> String {
    format!("{kind}:")
}

/// Meta prefix, `<kind>:ts:`.
pub fn meta_prefix(kind: ArtifactKind) -> String {
    format!("{kind}:ts:")
}

/// Initial classification recorded the first time an action is produced.
pub fn action_orig_key(fp: &Fingerprint) -> String {
    format!("action:orig:{fp}")
}

/// Justification text for the current action classification.
pub fn action_justification_key(fp: &Fingerprint) -> String {
    format!("action:justification:{fp}")
}

/// Snapshot of the user action rules in force when the action was computed.
pub fn action_userprompt_key(fp: &Fingerprint) -> String {
    format!("action:userprompt:{fp}")
}

/// Persistent queue record for a fingerprint.
pub fn queue_key(fp: &Fingerprint) -> String {
    format!("{QUEUE_PREFIX}{fp}")
}
