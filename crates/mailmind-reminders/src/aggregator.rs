use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use mailmind_core::hash::{kb_reminder_hash, message_reminder_hash};
use mailmind_core::keys::{DISABLED_REMINDERS, REMINDER_KB_LIST};
use mailmind_core::mail::MailClient;
use mailmind_core::types::{
    now_ms, BuildRemindersOptions, Reminder, ReminderCounts, ReminderList, ReminderSource,
};
use mailmind_core::{MailmindError, Result};
use mailmind_docs::DocumentManager;
use mailmind_pipeline::{ArtifactPipeline, FetchOptions};
use mailmind_store::KvStore;

use crate::kb::{self, KbReminderList};

/// Builds the merged reminder list: summary-cache scan for inbox messages
/// plus the parsed KB list, with the disabled-hash set applied and kept
/// free of orphans.
pub struct ReminderAggregator {
    store: Arc<KvStore>,
    pipeline: Arc<ArtifactPipeline>,
    mail: Arc<dyn MailClient>,
    docs: Arc<DocumentManager>,
}

impl ReminderAggregator {
    pub fn new(
        store: Arc<KvStore>,
        pipeline: Arc<ArtifactPipeline>,
        mail: Arc<dyn MailClient>,
        docs: Arc<DocumentManager>,
    ) -> Self {
        Self {
            store,
            pipeline,
            mail,
            docs,
        }
    }

    pub async fn build(&self, opts: BuildRemindersOptions) -> Result<ReminderList> {
        let disabled: BTreeSet<String> = self
            .store
            .get_json::<Vec<String>>(DISABLED_REMINDERS)
            .map_err(MailmindError::from)?
            .unwrap_or_default()
            .into_iter()
            .collect();

        let mut reminders = Vec::new();

        // Message-derived: cache-only summary reads for unreplied inbox
        // messages. Never computes; messages without a cached summary are
        // simply absent until the processor gets to them.
        for header in self
            .mail
            .list_inbox()
            .await
            .map_err(|e| MailmindError::Mail(e.to_string()))?
        {
            if self.mail.is_replied(&header).await.unwrap_or(false) {
                continue;
            }
            let summary = self
                .pipeline
                .get_summary(
                    &header,
                    FetchOptions {
                        cache_only: true,
                        ..FetchOptions::default()
                    },
                )
                .await?;
            let Some(summary) = summary else { continue };
            let Some(note) = summary.reminder else { continue };
            if note.content.trim().is_empty() {
                continue;
            }
            let fp = header.fingerprint();
            reminders.push(Reminder {
                hash: message_reminder_hash(&fp),
                content: note.content,
                due_date: note.due_date,
                due_time: note.due_time,
                source: ReminderSource::Message,
                unique_id: Some(fp),
                enabled: true,
            });
        }

        // KB-derived: served from the cached extraction when its hash
        // still matches the KB text, re-parsed otherwise. Entries past
        // due by more than one day drop here, at aggregation.
        let kb_text = self.docs.user_kb()?;
        let cached: Option<KbReminderList> = self
            .store
            .get_json(REMINDER_KB_LIST)
            .map_err(MailmindError::from)?;
        let notes = match cached {
            Some(list) if list.matches(&kb_text) => list.notes(),
            _ => kb::parse_kb_reminders(&kb_text),
        };
        let today = chrono::Utc::now().date_naive();
        for note in kb::drop_stale(notes, today) {
            reminders.push(Reminder {
                hash: kb_reminder_hash(&note.content),
                content: note.content,
                due_date: note.due_date,
                due_time: note.due_time,
                source: ReminderSource::Kb,
                unique_id: None,
                enabled: true,
            });
        }

        for r in &mut reminders {
            r.enabled = !disabled.contains(&r.hash);
        }

        self.prune_disabled(&disabled, &reminders)?;
        sort_reminders(&mut reminders);

        let disabled_count = reminders.iter().filter(|r| !r.enabled).count();
        let visible: Vec<Reminder> = if opts.include_disabled {
            reminders
        } else {
            reminders.into_iter().filter(|r| r.enabled).collect()
        };

        let counts = ReminderCounts {
            total: visible.len(),
            message: visible
                .iter()
                .filter(|r| r.source == ReminderSource::Message)
                .count(),
            kb: visible
                .iter()
                .filter(|r| r.source == ReminderSource::Kb)
                .count(),
            disabled: disabled_count,
        };
        debug!(
            total = counts.total,
            message = counts.message,
            kb = counts.kb,
            disabled = counts.disabled,
            "reminder list built"
        );

        Ok(ReminderList {
            reminders: visible,
            counts,
            generated_at: now_ms(),
        })
    }

    /// Enable or disable a reminder by hash. Idempotent.
    pub fn set_enabled(&self, hash: &str, enabled: bool) -> Result<()> {
        let mut disabled: BTreeSet<String> = self
            .store
            .get_json::<Vec<String>>(DISABLED_REMINDERS)
            .map_err(MailmindError::from)?
            .unwrap_or_default()
            .into_iter()
            .collect();
        let changed = if enabled {
            disabled.remove(hash)
        } else {
            disabled.insert(hash.to_string())
        };
        if changed {
            let list: Vec<&String> = disabled.iter().collect();
            self.store
                .set_json(DISABLED_REMINDERS, &list, Some("reminders"))
                .map_err(MailmindError::from)?;
            info!(hash, enabled, "reminder visibility changed");
        }
        Ok(())
    }

    /// Refresh the cached KB extraction when the KB text hash moved.
    /// Driven by the debounced KB-regeneration trigger.
    pub fn refresh_kb_list(&self) -> Result<()> {
        let kb_text = self.docs.user_kb()?;
        let fresh = KbReminderList::from_kb_text(&kb_text);
        let cached: Option<KbReminderList> = self
            .store
            .get_json(REMINDER_KB_LIST)
            .map_err(MailmindError::from)?;
        if cached.is_some_and(|c| c.content_hash == fresh.content_hash) {
            debug!("KB reminder list unchanged");
            return Ok(());
        }
        info!(entries = fresh.reminders.len(), "KB reminder list regenerated");
        self.store
            .set_json(REMINDER_KB_LIST, &fresh, Some("reminders"))
            .map_err(MailmindError::from)?;
        Ok(())
    }

    /// Drop disabled hashes that no longer match any aggregated reminder.
    fn prune_disabled(&self, disabled: &BTreeSet<String>, current: &[Reminder]) -> Result<()> {
        let live: BTreeSet<&str> = current.iter().map(|r| r.hash.as_str()).collect();
        let kept: Vec<&String> = disabled
            .iter()
            .filter(|h| live.contains(h.as_str()))
            .collect();
        if kept.len() != disabled.len() {
            debug!(
                pruned = disabled.len() - kept.len(),
                "pruning orphaned disabled-reminder hashes"
            );
            self.store
                .set_json(DISABLED_REMINDERS, &kept, Some("reminders"))
                .map_err(MailmindError::from)?;
        }
        Ok(())
    }
}

/// Dated before undated; date ascending; ties by time ascending with null
/// time after explicit time; message-derived before KB-derived on full
/// ties.
fn sort_reminders(reminders: &mut [Reminder]) {
    reminders.sort_by(|a, b| {
        match (&a.due_date, &b.due_date) {
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (Some(da), Some(db)) => {
                let ord = da.cmp(db);
                if ord != Ordering::Equal {
                    return ord;
                }
                let ord = match (&a.due_time, &b.due_time) {
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(ta), Some(tb)) => ta.cmp(tb),
                    (None, None) => Ordering::Equal,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (None, None) => {}
        }
        source_rank(a)
            .cmp(&source_rank(b))
            .then_with(|| a.content.cmp(&b.content))
    });
}

fn source_rank(r: &Reminder) -> u8 {
    match r.source {
        ReminderSource::Message => 0,
        ReminderSource::Kb => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reminder(
        content: &str,
        due: Option<&str>,
        time: Option<&str>,
        source: ReminderSource,
    ) -> Reminder {
        Reminder {
            content: content.to_string(),
            due_date: due.map(String::from),
            due_time: time.map(String::from),
            source,
            hash: match source {
                ReminderSource::Kb => kb_reminder_hash(content),
                ReminderSource::Message => format!("m:{content}"),
            },
            unique_id: None,
            enabled: true,
        }
    }

    #[test]
    fn sort_dated_before_undated_then_by_date_and_time() {
        let mut list = vec![
            reminder("Y", None, None, ReminderSource::Message),
            reminder("X", Some("2030-01-02"), None, ReminderSource::Message),
            reminder("Z-kb", Some("2030-01-01"), None, ReminderSource::Kb),
            reminder("Z-msg", Some("2030-01-01"), None, ReminderSource::Message),
            reminder("early", Some("2030-01-02"), Some("08:00"), ReminderSource::Message),
        ];
        sort_reminders(&mut list);
        let order: Vec<&str> = list.iter().map(|r| r.content.as_str()).collect();
        // Same date: message before kb. Explicit time before null time.
        assert_eq!(order, vec!["Z-msg", "Z-kb", "early", "X", "Y"]);
    }
}
