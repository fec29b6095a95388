//! KB-derived reminders: `- Reminder: Due YYYY/MM/DD, <content>` lines in
//! the user KB document, plus the cached extraction list the debounced
//! regeneration trigger maintains under `reminder_kb_list`.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mailmind_core::hash::djb2;
use mailmind_core::types::{now_ms, ReminderNote};

static KB_REMINDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^-\s*Reminder:\s*Due\s+(\d{4})/(\d{2})/(\d{2}),\s*(.+)$").unwrap()
});

/// One entry of the cached KB reminder list (`reminder_kb_list`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbReminderEntry {
    pub due_date: String,
    pub content: String,
}

/// Cached extraction of the KB document, refreshed only when the KB text
/// hash changes. Entries are stored unfiltered; staleness is judged at
/// aggregation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbReminderList {
    pub reminders: Vec<KbReminderEntry>,
    #[serde(rename = "contentHash")]
    pub content_hash: String,
    pub generated_at: i64,
}

impl KbReminderList {
    pub fn from_kb_text(kb_text: &str) -> Self {
        Self {
            reminders: parse_kb_reminders(kb_text)
                .into_iter()
                .map(|note| KbReminderEntry {
                    due_date: note.due_date.unwrap_or_default(),
                    content: note.content,
                })
                .collect(),
            content_hash: kb_text_hash(kb_text),
            generated_at: now_ms(),
        }
    }

    /// Whether this cached extraction still matches the given KB text.
    pub fn matches(&self, kb_text: &str) -> bool {
        self.content_hash == kb_text_hash(kb_text)
    }

    pub fn notes(&self) -> Vec<ReminderNote> {
        self.reminders
            .iter()
            .map(|e| ReminderNote {
                content: e.content.clone(),
                due_date: (!e.due_date.is_empty()).then(|| e.due_date.clone()),
                due_time: None,
            })
            .collect()
    }
}

pub fn kb_text_hash(kb_text: &str) -> String {
    djb2(kb_text).to_string()
}

/// All reminder lines in the document, in order, with the slash dates
/// rewritten to `YYYY-MM-DD`. No staleness filtering here.
pub fn parse_kb_reminders(kb_text: &str) -> Vec<ReminderNote> {
    kb_text
        .lines()
        .filter_map(|line| {
            let caps = KB_REMINDER_RE.captures(line.trim())?;
            Some(ReminderNote {
                content: caps[4].trim().to_string(),
                due_date: Some(format!("{}-{}-{}", &caps[1], &caps[2], &caps[3])),
                due_time: None,
            })
        })
        .collect()
}

/// Aggregation-time rule: reminders past due by more than one day drop.
pub fn drop_stale(notes: Vec<ReminderNote>, today: NaiveDate) -> Vec<ReminderNote> {
    notes
        .into_iter()
        .filter(|note| {
            let Some(due) = note
                .due_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                return true;
            };
            if due < today - chrono::Duration::days(1) {
                debug!(content = %note.content, "dropping stale KB reminder");
                return false;
            }
            true
        })
        .collect()
}
