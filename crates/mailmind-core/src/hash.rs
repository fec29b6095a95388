//! Wire-stable hashes for reminder identity and change detection.
//!
//! The hashes below are part of the persisted storage format
//! (`disabled_reminders`, `proactiveCheckin_reminderHash`); changing the
//! algorithm invalidates every stored hash.

use crate::types::{Fingerprint, Reminder};

/// Classic djb2 over the UTF-8 bytes, 32-bit wrapping.
pub fn djb2(s: &str) -> u32 {
    s.bytes()
        .fold(5381u32, |h, b| h.wrapping_mul(33).wrapping_add(b as u32))
}

/// Stable key for a message-derived reminder.
pub fn message_reminder_hash(fp: &Fingerprint) -> String {
    format!("m:{fp}")
}

/// Stable key for a KB-derived reminder.
pub fn kb_reminder_hash(content: &str) -> String {
    format!("k:{}", djb2(content))
}

/// Content+due hash of a whole reminder list, independent of order.
/// Drives the significant-change detector for proactive check-ins.
pub fn reminder_list_hash(reminders: &[Reminder]) -> String {
    let mut lines: Vec<String> = reminders
        .iter()
        .map(|r| {
            format!(
                "{}|{}|{}",
                r.content,
                r.due_date.as_deref().unwrap_or(""),
                r.due_time.as_deref().unwrap_or("")
            )
        })
        .collect();
    lines.sort();
    djb2(&lines.join("\n")).to_string()
}
