//! End-to-end scenarios against the assembled agent, with scripted
//! collaborators standing in for the mail client, auth, and the LLM
//! endpoint.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;

use mailmind_agent::{Collaborators, MailAgent};
use mailmind_core::config::MailmindConfig;
use mailmind_core::keys;
use mailmind_core::mail::{
    Auth, AuthError, ChatWindow, MailClient, MailError, Privacy, StatusSink,
};
use mailmind_core::types::{
    now_ms, ArtifactKind, BuildRemindersOptions, EnqueueOptions, Fingerprint, MessageHeader,
    ReminderNote, ReminderSource, Summary,
};

// --- stub collaborators ----------------------------------------------------

use mailmind_llm::{LlmTransport, TransportBody, TransportError, TransportRequest};

struct ScriptedTransport {
    script: Mutex<Vec<Result<serde_json::Value, TransportError>>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<serde_json::Value, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    fn text(content: &str) -> serde_json::Value {
        serde_json::json!({ "content": content, "model": "stub", "stop_reason": "end" })
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn send(&self, _req: &TransportRequest) -> Result<TransportBody, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(Self::text("Two-line summary: default"))
            } else {
                script.remove(0)
            }
        };
        next.map(TransportBody::Json)
    }
}

#[derive(Default)]
struct StubMail {
    headers: Mutex<Vec<MessageHeader>>,
    internal: Mutex<HashSet<String>>,
    replied: Mutex<HashSet<String>>,
}

impl StubMail {
    fn add(&self, message_id: &str) -> MessageHeader {
        let header = MessageHeader {
            id: message_id.to_string(),
            message_id: message_id.to_string(),
            folder: "INBOX".to_string(),
            subject: format!("About {message_id}"),
            author: "sender@example.com".to_string(),
            recipients: vec!["me@example.com".to_string()],
            date_ms: now_ms(),
        };
        self.headers.lock().unwrap().push(header.clone());
        header
    }
}

#[async_trait]
impl MailClient for StubMail {
    async fn list_inbox(&self) -> Result<Vec<MessageHeader>, MailError> {
        Ok(self.headers.lock().unwrap().clone())
    }

    async fn find_header(&self, fp: &Fingerprint) -> Result<Option<MessageHeader>, MailError> {
        Ok(self
            .headers
            .lock()
            .unwrap()
            .iter()
            .find(|h| &h.fingerprint() == fp)
            .cloned())
    }

    async fn get_body(&self, _header: &MessageHeader) -> Result<String, MailError> {
        Ok("Hello,\n\nsee details below.".to_string())
    }

    async fn move_message(&self, _h: &MessageHeader, _f: &str) -> Result<(), MailError> {
        Ok(())
    }

    async fn set_tags(&self, _h: &MessageHeader, _t: &[String]) -> Result<(), MailError> {
        Ok(())
    }

    fn is_internal(&self, header: &MessageHeader) -> bool {
        self.internal.lock().unwrap().contains(&header.message_id)
    }

    async fn is_replied(&self, header: &MessageHeader) -> Result<bool, MailError> {
        Ok(self
            .replied
            .lock()
            .unwrap()
            .contains(&header.fingerprint().to_string()))
    }

    fn user_name(&self) -> String {
        "Alex".to_string()
    }
}

struct StubAuth;

#[async_trait]
impl Auth for StubAuth {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok("token".to_string())
    }
    async fn reauthenticate(&self) -> Result<String, AuthError> {
        Ok("token".to_string())
    }
    async fn signed_in(&self) -> bool {
        true
    }
}

struct StubPrivacy;

#[async_trait]
impl Privacy for StubPrivacy {
    async fn ai_blocked(&self) -> bool {
        false
    }
}

struct StubChat;

#[async_trait]
impl ChatWindow for StubChat {
    async fn is_open(&self) -> bool {
        false
    }
    async fn open(&self) {}
    async fn recent_history(&self, _turns: usize) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Default)]
struct RecordingSink {
    started: AtomicU32,
    ended: AtomicU32,
}

impl StatusSink for RecordingSink {
    fn throttle_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn throttle_ended(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

struct Rig {
    agent: Arc<MailAgent>,
    transport: Arc<ScriptedTransport>,
    mail: Arc<StubMail>,
    sink: Arc<RecordingSink>,
}

fn rig_with(
    script: Vec<Result<serde_json::Value, TransportError>>,
    tune: impl FnOnce(&mut MailmindConfig),
) -> Rig {
    let mut config = MailmindConfig::default();
    config.llm.max_retries = 1;
    config.llm.retry_base_ms = 10;
    config.triggers.checkin_debounce_ms = 10;
    config.triggers.kb_reminders_debounce_ms = 10;
    tune(&mut config);

    let transport = ScriptedTransport::new(script);
    let mail = Arc::new(StubMail::default());
    let sink = Arc::new(RecordingSink::default());
    let agent = MailAgent::with_connection(
        config,
        Collaborators {
            mail: mail.clone(),
            auth: Arc::new(StubAuth),
            privacy: Arc::new(StubPrivacy),
            chat: Arc::new(StubChat),
            status: sink.clone(),
            transport: transport.clone(),
        },
        Connection::open_in_memory().unwrap(),
    )
    .unwrap();
    Rig {
        agent,
        transport,
        mail,
        sink,
    }
}

fn rig(script: Vec<Result<serde_json::Value, TransportError>>) -> Rig {
    rig_with(script, |_| {})
}

fn seed_summary(rig: &Rig, header: &MessageHeader, blurb: &str, reminder: Option<ReminderNote>) {
    let fp = header.fingerprint();
    let summary = Summary {
        blurb: blurb.to_string(),
        detailed: "d".to_string(),
        todos: "t".to_string(),
        reminder,
        id: fp.clone(),
    };
    rig.agent
        .store()
        .set_json(
            &keys::payload_key(ArtifactKind::Summary, &fp),
            &summary,
            Some("summary"),
        )
        .unwrap();
    rig.agent
        .store()
        .set_one(&keys::meta_key(ArtifactKind::Summary, &fp), "0", Some("summary"))
        .unwrap();
}

// --- scenarios -------------------------------------------------------------

#[tokio::test]
async fn cache_hit_fast_path() {
    let r = rig(vec![]);
    let header = r.mail.add("abc@host");
    seed_summary(&r, &header, "b", None);
    let fp = header.fingerprint();
    let meta_key = keys::meta_key(ArtifactKind::Summary, &fp);

    let ts_before = r
        .agent
        .store()
        .get_all()
        .unwrap()
        .into_iter()
        .find(|rec| rec.key == meta_key)
        .and_then(|rec| rec.ts)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let got = r.agent.get_summary(&header, false, false).await.unwrap().unwrap();
    assert_eq!(got.blurb, "b");
    assert_eq!(r.transport.calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let ts_after = r
        .agent
        .store()
        .get_all()
        .unwrap()
        .into_iter()
        .find(|rec| rec.key == meta_key)
        .and_then(|rec| rec.ts)
        .unwrap();
    assert!(ts_after > ts_before);
}

#[tokio::test]
async fn concurrent_miss_dedups_to_one_call() {
    let r = rig(vec![Ok(ScriptedTransport::text(
        "Todos: Foo.\nTwo-line summary: Bar.\nReminder due date: none\nReminder content: none",
    ))]);
    let header = r.mail.add("xyz@host");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let agent = r.agent.clone();
        let header = header.clone();
        handles.push(tokio::spawn(async move {
            agent.get_summary(&header, false, false).await.unwrap().unwrap()
        }));
    }
    for h in handles {
        let s = h.await.unwrap();
        assert_eq!(s.blurb, "Bar.");
        assert_eq!(s.detailed, "");
        assert_eq!(s.todos, "• Foo");
        assert!(s.reminder.is_none());
    }
    assert_eq!(r.transport.calls.load(Ordering::SeqCst), 1);

    let fp = header.fingerprint();
    assert!(r
        .agent
        .store()
        .get(&keys::payload_key(ArtifactKind::Summary, &fp))
        .unwrap()
        .is_some());
    assert!(r
        .agent
        .store()
        .get(&keys::meta_key(ArtifactKind::Summary, &fp))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn throttle_loop_waits_and_recovers() {
    let r = rig(vec![
        Err(TransportError::RateLimited {
            retry_after_seconds: 0.02,
        }),
        Err(TransportError::RateLimited {
            retry_after_seconds: 0.02,
        }),
        Ok(ScriptedTransport::text("Two-line summary: done.")),
    ]);
    let header = r.mail.add("throttle@host");

    let started = std::time::Instant::now();
    let got = r.agent.get_summary(&header, false, false).await.unwrap().unwrap();
    assert_eq!(got.blurb, "done.");
    // 20ms then 20 * 1.5 = 30ms of server-requested waiting.
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(r.transport.calls.load(Ordering::SeqCst), 3);
    assert_eq!(r.sink.started.load(Ordering::SeqCst), 1);
    assert_eq!(r.sink.ended.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn action_patch_appends_into_section_idempotently() {
    let r = rig(vec![]);
    let doc = "# Emails to be marked as `archive` (DO NOT EDIT/DELETE THIS SECTION HEADER)\n- Old rule.\n";
    r.agent
        .store()
        .set_one(keys::ACTION_RULES_DOC, doc, Some("doc"))
        .unwrap();

    let patch = "ADD\narchive\n- Newsletters from acme.";
    r.agent.apply_action_patch(patch, "chat").await.unwrap();
    let once = r.agent.store().get(keys::ACTION_RULES_DOC).unwrap().unwrap();
    assert!(once.contains("- Old rule.\n- Newsletters from acme."));

    r.agent.apply_action_patch(patch, "chat").await.unwrap();
    let twice = r.agent.store().get(keys::ACTION_RULES_DOC).unwrap().unwrap();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn reminder_merge_and_sort_order() {
    let r = rig(vec![]);
    let a = r.mail.add("a@host");
    let b = r.mail.add("b@host");
    let c = r.mail.add("c@host");

    seed_summary(
        &r,
        &a,
        "a",
        Some(ReminderNote {
            content: "X".to_string(),
            due_date: Some("2030-01-02".to_string()),
            due_time: None,
        }),
    );
    seed_summary(
        &r,
        &b,
        "b",
        Some(ReminderNote {
            content: "Y".to_string(),
            due_date: None,
            due_time: None,
        }),
    );
    seed_summary(
        &r,
        &c,
        "c",
        Some(ReminderNote {
            content: "Z".to_string(),
            due_date: Some("2030-01-01".to_string()),
            due_time: None,
        }),
    );
    r.agent
        .store()
        .set_one(
            keys::USER_KB_DOC,
            "# KB\n- Reminder: Due 2030/01/01, Z\n",
            Some("doc"),
        )
        .unwrap();

    let list = r
        .agent
        .build_reminder_list(BuildRemindersOptions::default())
        .await
        .unwrap();

    let got: Vec<(String, ReminderSource)> = list
        .reminders
        .iter()
        .map(|r| (r.content.clone(), r.source))
        .collect();
    assert_eq!(
        got,
        vec![
            ("Z".to_string(), ReminderSource::Message),
            ("Z".to_string(), ReminderSource::Kb),
            ("X".to_string(), ReminderSource::Message),
            ("Y".to_string(), ReminderSource::Message),
        ]
    );
    assert_eq!(list.counts.total, 4);
    assert_eq!(list.counts.message, 3);
    assert_eq!(list.counts.kb, 1);
    assert_eq!(r.transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disabled_reminder_orphans_pruned_after_build() {
    let r = rig(vec![]);
    let a = r.mail.add("a@host");
    seed_summary(
        &r,
        &a,
        "a",
        Some(ReminderNote {
            content: "Live".to_string(),
            due_date: None,
            due_time: None,
        }),
    );

    let live_hash = format!("m:{}", a.fingerprint());
    r.agent
        .store()
        .set_json(
            keys::DISABLED_REMINDERS,
            &vec![live_hash.clone(), "m:gone#Nowhere".to_string()],
            Some("reminders"),
        )
        .unwrap();

    let list = r
        .agent
        .build_reminder_list(BuildRemindersOptions {
            include_disabled: true,
        })
        .await
        .unwrap();
    assert_eq!(list.counts.disabled, 1);
    assert!(!list.reminders[0].enabled);

    let disabled: Vec<String> = r
        .agent
        .store()
        .get_json(keys::DISABLED_REMINDERS)
        .unwrap()
        .unwrap();
    assert_eq!(disabled, vec![live_hash]);
}

#[tokio::test]
async fn checkin_cooldown_gate_blocks_without_llm_call() {
    let r = rig_with(vec![], |config| {
        config.checkin.cooldown_ms = 60_000;
    });
    let a = r.mail.add("a@host");
    seed_summary(
        &r,
        &a,
        "a",
        Some(ReminderNote {
            content: "Pay rent".to_string(),
            due_date: None,
            due_time: None,
        }),
    );

    let last_run = now_ms() - 10_000;
    r.agent
        .store()
        .set_one(
            keys::CHECKIN_LAST_RUN,
            &format!("{{\"last_run_ms\":{last_run},\"last_result\":null}}"),
            Some("checkin"),
        )
        .unwrap();

    r.agent.on_inbox_updated().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(r.transport.calls.load(Ordering::SeqCst), 0);
    let stored: serde_json::Value = r
        .agent
        .store()
        .get_json(keys::CHECKIN_LAST_RUN)
        .unwrap()
        .unwrap();
    assert_eq!(stored["last_run_ms"].as_i64().unwrap(), last_run);
}

#[tokio::test]
async fn checkin_reaches_out_and_pending_message_consumed_once() {
    let r = rig_with(
        vec![Ok(ScriptedTransport::text(
            "{\"reach_out\": true, \"message\": \"Rent is due tomorrow.\"}",
        ))],
        |config| {
            config.checkin.cooldown_ms = 60_000;
        },
    );
    let a = r.mail.add("a@host");
    seed_summary(
        &r,
        &a,
        "a",
        Some(ReminderNote {
            content: "Pay rent".to_string(),
            due_date: None,
            due_time: None,
        }),
    );

    r.agent.on_inbox_updated().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(r.transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        r.agent.consume_pending_proactive_message().as_deref(),
        Some("Rent is due tomorrow.")
    );
    // Atomically cleared.
    assert_eq!(r.agent.consume_pending_proactive_message(), None);
}

#[tokio::test]
async fn process_message_drives_all_three_stages() {
    let r = rig(vec![
        Ok(ScriptedTransport::text(
            "Two-line summary: B.\nReminder content: none",
        )),
        Ok(ScriptedTransport::text("Action: none\nJustification: Nothing.")),
        Ok(ScriptedTransport::text("Thanks, got it.")),
    ]);
    let header = r.mail.add("job@host");
    r.agent.start();

    r.agent
        .process_message(
            header.fingerprint(),
            EnqueueOptions {
                source: "display".to_string(),
                ..EnqueueOptions::default()
            },
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let fp = header.fingerprint();
    for kind in [ArtifactKind::Summary, ArtifactKind::Action, ArtifactKind::Reply] {
        assert!(
            r.agent
                .store()
                .get(&keys::payload_key(kind, &fp))
                .unwrap()
                .is_some(),
            "missing artifact for {kind}"
        );
    }
    r.agent.stop();
}

#[tokio::test]
async fn queued_jobs_survive_restart() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mailmind=debug")
        .try_init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mailmind.db");
    let fp;

    // Session one: enqueue while the consumer is not running, then shut
    // down. The job stays persisted.
    {
        let mut config = MailmindConfig::default();
        config.llm.max_retries = 0;
        let transport = ScriptedTransport::new(vec![]);
        let mail = Arc::new(StubMail::default());
        let header = mail.add("offline@host");
        fp = header.fingerprint();
        let agent = MailAgent::with_connection(
            config,
            Collaborators {
                mail,
                auth: Arc::new(StubAuth),
                privacy: Arc::new(StubPrivacy),
                chat: Arc::new(StubChat),
                status: Arc::new(RecordingSink::default()),
                transport,
            },
            Connection::open(&path).unwrap(),
        )
        .unwrap();
        agent
            .process_message(
                fp.clone(),
                EnqueueOptions {
                    source: "display".to_string(),
                    ..EnqueueOptions::default()
                },
            )
            .unwrap();
    }

    // Session two: same database, consumer running. The persisted job
    // drains without being re-enqueued.
    let mut config = MailmindConfig::default();
    config.llm.max_retries = 0;
    let transport = ScriptedTransport::new(vec![
        Ok(ScriptedTransport::text(
            "Two-line summary: B.\nReminder content: none",
        )),
        Ok(ScriptedTransport::text("Action: none\nJustification: n.")),
        Ok(ScriptedTransport::text("Thanks.")),
    ]);
    let mail = Arc::new(StubMail::default());
    mail.add("offline@host");
    let agent = MailAgent::with_connection(
        config,
        Collaborators {
            mail,
            auth: Arc::new(StubAuth),
            privacy: Arc::new(StubPrivacy),
            chat: Arc::new(StubChat),
            status: Arc::new(RecordingSink::default()),
            transport: transport.clone(),
        },
        Connection::open(&path).unwrap(),
    )
    .unwrap();
    agent.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(agent
        .store()
        .get(&keys::payload_key(ArtifactKind::Summary, &fp))
        .unwrap()
        .is_some());
    assert!(agent.store().get(&keys::queue_key(&fp)).unwrap().is_none());
    agent.stop();
}

#[tokio::test]
async fn kb_patch_regenerates_cached_kb_list() {
    let r = rig(vec![]);
    r.agent
        .apply_kb_patch("ADD\n- Reminder: Due 2031/05/01, renew passport", "chat")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let cached: serde_json::Value = r
        .agent
        .store()
        .get_json(keys::REMINDER_KB_LIST)
        .unwrap()
        .expect("kb list cached");
    let entries = cached["reminders"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["due_date"], "2031-05-01");
    assert!(entries[0]["content"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("renew passport"));
}
