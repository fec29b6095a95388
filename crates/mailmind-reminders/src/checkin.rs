use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mailmind_core::config::CheckinConfig;
use mailmind_core::hash::reminder_list_hash;
use mailmind_core::keys::{
    CHECKIN_LAST_RUN, CHECKIN_PENDING_MESSAGE, CHECKIN_REMINDER_HASH, DUE_REMINDER_ADVANCE_MINUTES,
    GRACE_MINUTES, NEW_REMINDER_WINDOW_DAYS, PROACTIVE_ENABLED,
};
use mailmind_core::mail::{Auth, ChatWindow, MailClient};
use mailmind_core::types::{now_ms, BuildRemindersOptions, CheckinOutcome, Reminder};
use mailmind_llm::{
    ChatMessage, ChatOptions, LlmGate, ToolCall, ToolDefinition, ToolExecutor, ToolOutcome,
};
use mailmind_store::KvStore;
use mailmind_sync::{DebouncedTrigger, MergeArgs};

use crate::aggregator::ReminderAggregator;
use crate::idmap::IdMap;

/// Trigger reason carried through the debouncer; latest wins in a burst.
#[derive(Clone, Debug)]
pub struct CheckinReason(pub String);

impl MergeArgs for CheckinReason {
    fn merge(&mut self, newer: Self) {
        self.0 = newer.0;
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckinRecord {
    last_run_ms: i64,
    last_result: Option<CheckinOutcome>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingMessage {
    message: String,
    created_ms: i64,
    id_map: HashMap<String, String>,
}

/// Reminder-window settings, read from the store so the embedding UI can
/// flip them without a config reload.
struct NotificationSettings {
    proactive_enabled: bool,
    new_reminder_window_days: i64,
    due_reminder_advance_minutes: i64,
    grace_minutes: i64,
}

/// Strict response shape for a check-in run.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckinDecision {
    reach_out: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Proactive check-in orchestrator. Observes reminder changes,
/// debounces them, walks the gate ladder, and at most one run at a time
/// asks the LLM whether to reach out.
pub struct ProactiveCheckin {
    store: Arc<KvStore>,
    gate: Arc<LlmGate>,
    aggregator: Arc<ReminderAggregator>,
    mail: Arc<dyn MailClient>,
    chat: Arc<dyn ChatWindow>,
    auth: Arc<dyn Auth>,
    cfg: CheckinConfig,
    trigger: DebouncedTrigger<CheckinReason>,
    in_flight: AtomicBool,
}

impl ProactiveCheckin {
    pub fn new(
        store: Arc<KvStore>,
        gate: Arc<LlmGate>,
        aggregator: Arc<ReminderAggregator>,
        mail: Arc<dyn MailClient>,
        chat: Arc<dyn ChatWindow>,
        auth: Arc<dyn Auth>,
        cfg: CheckinConfig,
        debounce: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let trigger = {
                let weak = weak.clone();
                DebouncedTrigger::new("proactive-checkin", debounce, move |reason: CheckinReason| {
                    let weak = weak.clone();
                    Box::pin(async move {
                        if let Some(this) = weak.upgrade() {
                            this.run_gated(reason).await;
                        }
                    })
                })
            };
            Self {
                store,
                gate,
                aggregator,
                mail,
                chat,
                auth,
                cfg,
                trigger,
                in_flight: AtomicBool::new(false),
            }
        })
    }

    /// Called once at startup; discards any pending message that went
    /// stale while the process was down.
    pub fn init(&self) {
        match self.store.get_json::<PendingMessage>(CHECKIN_PENDING_MESSAGE) {
            Ok(Some(p)) if now_ms() - p.created_ms > self.cfg.cooldown_ms => {
                debug!("discarding stale pending proactive message at startup");
                let _ = self.store.remove(&[CHECKIN_PENDING_MESSAGE]);
            }
            Err(e) => warn!(error = %e, "pending-message read failed at init"),
            _ => {}
        }
    }

    /// Inbox changed (processor drain, reminder toggle, KB edit). Arms the
    /// debounced trigger only when the reminder list's content+due hash
    /// differs from the persisted previous one.
    pub async fn on_inbox_updated(&self) {
        let list = match self
            .aggregator
            .build(BuildRemindersOptions::default())
            .await
        {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "reminder build failed in change detector");
                return;
            }
        };

        let settings = self.notification_settings();
        let worthy: Vec<&Reminder> = list
            .reminders
            .iter()
            .filter(|r| checkin_worthy(r, &settings))
            .collect();
        let hash = reminder_list_hash(
            &worthy.iter().map(|r| (*r).clone()).collect::<Vec<_>>(),
        );

        let previous = self.store.get(CHECKIN_REMINDER_HASH).ok().flatten();
        if previous.as_deref() == Some(hash.as_str()) {
            debug!("reminder hash unchanged, not arming check-in");
            return;
        }
        if let Err(e) = self
            .store
            .set_one(CHECKIN_REMINDER_HASH, &hash, Some("checkin"))
        {
            warn!(error = %e, "failed to persist reminder hash");
            return;
        }

        info!("significant reminder change, arming check-in");
        self.trigger.request(CheckinReason("reminder-change".to_string()));
    }

    /// Returns the pending proactive message iff it is no older than the
    /// cooldown, clearing it either way.
    pub fn consume_pending_proactive_message(&self) -> Option<String> {
        let pending = self
            .store
            .get_json::<PendingMessage>(CHECKIN_PENDING_MESSAGE)
            .ok()
            .flatten()?;
        let _ = self.store.remove(&[CHECKIN_PENDING_MESSAGE]);
        if now_ms() - pending.created_ms <= self.cfg.cooldown_ms {
            Some(pending.message)
        } else {
            debug!("pending proactive message went stale, discarded");
            None
        }
    }

    // --- gated run -----------------------------------------------------------

    async fn run_gated(&self, reason: CheckinReason) {
        let settings = self.notification_settings();
        if !settings.proactive_enabled {
            debug!(gate = "disabled", "gate_blocked");
            return;
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(gate = "in_flight", "gate_blocked");
            return;
        }
        let _reset = InFlightReset(&self.in_flight);

        if self.chat.is_open().await {
            debug!(gate = "chat_open", "gate_blocked");
            return;
        }
        let record = self
            .store
            .get_json::<CheckinRecord>(CHECKIN_LAST_RUN)
            .ok()
            .flatten()
            .unwrap_or_default();
        if now_ms() - record.last_run_ms <= self.cfg.cooldown_ms {
            debug!(gate = "cooldown", "gate_blocked");
            return;
        }
        if !self.auth.signed_in().await {
            debug!(gate = "signed_out", "gate_blocked");
            return;
        }

        let outcome = self.run_checkin(&reason).await;
        info!(outcome = %outcome, reason = %reason.0, "check-in run finished");
        let record = CheckinRecord {
            last_run_ms: now_ms(),
            last_result: Some(outcome),
        };
        if let Err(e) = self.store.set_json(CHECKIN_LAST_RUN, &record, Some("checkin")) {
            warn!(error = %e, "failed to persist check-in record");
        }
    }

    async fn run_checkin(&self, reason: &CheckinReason) -> CheckinOutcome {
        let list = match self
            .aggregator
            .build(BuildRemindersOptions::default())
            .await
        {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "reminder build failed in check-in");
                return CheckinOutcome::Error;
            }
        };
        if list.reminders.is_empty() {
            return CheckinOutcome::Empty;
        }

        let id_map = Arc::new(Mutex::new(IdMap::new()));
        let reminders_json = render_reminders(&list.reminders, &id_map);
        let history = self.chat.recent_history(self.cfg.history_turns).await;
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string();

        let prompt = format!(
            "You are the proactive assistant for {name}'s mailbox.\n\
             Decide whether to reach out about the reminders below.\n\
             Respond with strict JSON only: {{\"reach_out\": bool, \"message\": \"...\"}}.\n\
             Current time: {now}\nTrigger: {reason}\n\n\
             Reminders:\n{reminders}\n\n\
             Recent chat:\n{history}",
            name = self.mail.user_name(),
            now = now,
            reason = reason.0,
            reminders = reminders_json,
            history = history.join("\n"),
        );

        let executor = Arc::new(CheckinToolExecutor {
            id_map: id_map.clone(),
            reminders: list.reminders.clone(),
        });
        let opts = ChatOptions {
            ignore_semaphore: true,
            ..ChatOptions::default()
        };

        let reply = match self
            .gate
            .chat_with_tools(vec![ChatMessage::system(prompt)], executor, opts)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "check-in LLM call failed");
                return CheckinOutcome::Error;
            }
        };

        let decision: CheckinDecision = match serde_json::from_str(reply.content.trim()) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "check-in response is not the expected JSON");
                return CheckinOutcome::Error;
            }
        };

        match decision {
            CheckinDecision {
                reach_out: true,
                message: Some(message),
            } if !message.trim().is_empty() => {
                let pending = PendingMessage {
                    message,
                    created_ms: now_ms(),
                    id_map: id_map.lock().unwrap().snapshot(),
                };
                if let Err(e) =
                    self.store
                        .set_json(CHECKIN_PENDING_MESSAGE, &pending, Some("checkin"))
                {
                    warn!(error = %e, "failed to persist pending message");
                    return CheckinOutcome::Error;
                }
                self.chat.open().await;
                CheckinOutcome::ReachedOut
            }
            _ => CheckinOutcome::NoAction,
        }
    }

    fn notification_settings(&self) -> NotificationSettings {
        let get_i64 = |key: &str, default: i64| {
            self.store
                .get(key)
                .ok()
                .flatten()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(default)
        };
        let enabled = self
            .store
            .get(PROACTIVE_ENABLED)
            .ok()
            .flatten()
            .map(|v| v.trim() != "false")
            .unwrap_or(true);
        NotificationSettings {
            proactive_enabled: enabled,
            new_reminder_window_days: get_i64(NEW_REMINDER_WINDOW_DAYS, 7),
            due_reminder_advance_minutes: get_i64(DUE_REMINDER_ADVANCE_MINUTES, 120),
            grace_minutes: get_i64(GRACE_MINUTES, 15),
        }
    }
}

struct InFlightReset<'a>(&'a AtomicBool);

impl Drop for InFlightReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A reminder counts toward a check-in when it is undated, or dated
/// within the new-reminder window; same-day reminders with an explicit
/// time only count once inside the advance window (minus grace).
fn checkin_worthy(r: &Reminder, s: &NotificationSettings) -> bool {
    let Some(date) = r
        .due_date
        .as_deref()
        .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    else {
        return true;
    };
    let now = chrono::Utc::now();
    let days_until = (date - now.date_naive()).num_days();
    if days_until < 0 || days_until > s.new_reminder_window_days {
        return false;
    }
    if days_until == 0 {
        if let Some(time) = r
            .due_time
            .as_deref()
            .and_then(|t| chrono::NaiveTime::parse_from_str(t, "%H:%M").ok())
        {
            let minutes_until = (time - now.time()).num_minutes();
            return minutes_until <= s.due_reminder_advance_minutes + s.grace_minutes;
        }
    }
    true
}

fn render_reminders(reminders: &[Reminder], id_map: &Arc<Mutex<IdMap>>) -> String {
    let mut map = id_map.lock().unwrap();
    let entries: Vec<serde_json::Value> = reminders
        .iter()
        .map(|r| {
            serde_json::json!({
                "ref": map.token_for(&r.hash),
                "content": r.content,
                "due_date": r.due_date,
                "due_time": r.due_time,
                "source": r.source,
            })
        })
        .collect();
    serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
}

/// Scoped tool executor for one check-in run. Shares the run's isolated
/// id-translation context; tokens from other runs resolve to nothing.
struct CheckinToolExecutor {
    id_map: Arc<Mutex<IdMap>>,
    reminders: Vec<Reminder>,
}

#[async_trait]
impl ToolExecutor for CheckinToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "get_reminder".to_string(),
            description: "Look up full details of a reminder by its ref token.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "ref": { "type": "string" } },
                "required": ["ref"],
            }),
        }]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        if call.name != "get_reminder" {
            return ToolOutcome::error(format!("unknown tool: {}", call.name));
        }
        let Some(token) = call.input.get("ref").and_then(|v| v.as_str()) else {
            return ToolOutcome::error("missing ref argument");
        };
        let real = {
            let map = self.id_map.lock().unwrap();
            map.resolve(token).map(String::from)
        };
        let Some(hash) = real else {
            return ToolOutcome::error(format!("unknown ref: {token}"));
        };
        match self.reminders.iter().find(|r| r.hash == hash) {
            Some(r) => ToolOutcome::success(
                serde_json::to_string(r).unwrap_or_else(|_| "{}".to_string()),
            ),
            None => ToolOutcome::error(format!("reminder not found for ref {token}")),
        }
    }
}
