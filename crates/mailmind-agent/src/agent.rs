use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mailmind_core::config::{MailmindConfig, APP_VERSION};
use mailmind_core::mail::{Auth, ChatWindow, MailClient, Privacy, StatusSink};
use mailmind_core::types::{
    BuildRemindersOptions, EnqueueOptions, Fingerprint, MailEvent, MessageHeader, ReminderList,
    Summary,
};
use mailmind_core::{MailmindError, Result};
use mailmind_docs::{DocEvent, DocumentManager};
use mailmind_llm::{LlmGate, LlmTransport};
use mailmind_pipeline::{ArtifactPipeline, FetchOptions, ProcessorQueue};
use mailmind_reminders::{ProactiveCheckin, ReminderAggregator};
use mailmind_store::{KvStore, StorageUsage};
use mailmind_sync::DebouncedTrigger;

use crate::maintenance;

/// Everything the embedding mail client supplies. The core holds these as
/// handles from construction on; there are no late-bound globals.
pub struct Collaborators {
    pub mail: Arc<dyn MailClient>,
    pub auth: Arc<dyn Auth>,
    pub privacy: Arc<dyn Privacy>,
    pub chat: Arc<dyn ChatWindow>,
    pub status: Arc<dyn StatusSink>,
    pub transport: Arc<dyn LlmTransport>,
}

/// The assembled core. Construct with [`MailAgent::new`] (or
/// [`MailAgent::with_connection`] for tests), then [`MailAgent::start`]
/// to launch the background tasks.
pub struct MailAgent {
    store: Arc<KvStore>,
    docs: Arc<DocumentManager>,
    pipeline: Arc<ArtifactPipeline>,
    queue: Arc<ProcessorQueue>,
    aggregator: Arc<ReminderAggregator>,
    checkin: Arc<ProactiveCheckin>,
    kb_trigger: DebouncedTrigger<()>,
    purge_interval_secs: u64,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MailAgent {
    /// Open (or create) the on-disk store and assemble the core.
    pub fn new(config: MailmindConfig, collab: Collaborators) -> Result<Arc<Self>> {
        let path = std::path::Path::new(&config.database.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MailmindError::Storage(e.to_string()))?;
        }
        let conn =
            Connection::open(path).map_err(|e| MailmindError::Storage(e.to_string()))?;
        Self::with_connection(config, collab, conn)
    }

    /// Assemble the core over an existing connection (tests use
    /// `Connection::open_in_memory`).
    pub fn with_connection(
        config: MailmindConfig,
        collab: Collaborators,
        conn: Connection,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(
            KvStore::new(conn, APP_VERSION, config.cache.quota_bytes)
                .map_err(MailmindError::from)?,
        );
        let docs = Arc::new(DocumentManager::new(store.clone()));
        let gate = Arc::new(LlmGate::new(
            collab.transport.clone(),
            collab.auth.clone(),
            collab.privacy.clone(),
            collab.status.clone(),
            &config.llm,
        ));
        let pipeline = Arc::new(ArtifactPipeline::new(
            store.clone(),
            gate.clone(),
            collab.mail.clone(),
            docs.clone(),
            config.cache.clone(),
        ));
        let queue = ProcessorQueue::new(
            store.clone(),
            pipeline.clone(),
            collab.mail.clone(),
            config.queue.max_attempts,
        );
        let aggregator = Arc::new(ReminderAggregator::new(
            store.clone(),
            pipeline.clone(),
            collab.mail.clone(),
            docs.clone(),
        ));
        let checkin = ProactiveCheckin::new(
            store.clone(),
            gate,
            aggregator.clone(),
            collab.mail.clone(),
            collab.chat.clone(),
            collab.auth.clone(),
            config.checkin.clone(),
            Duration::from_millis(config.triggers.checkin_debounce_ms),
        );

        // Queue drains feed the check-in change detector.
        {
            let checkin = checkin.clone();
            queue.set_drain_hook(Arc::new(move || {
                let checkin = checkin.clone();
                tokio::spawn(async move {
                    checkin.on_inbox_updated().await;
                });
            }));
        }

        // KB edits coalesce into one list regeneration + change check.
        let kb_trigger = {
            let aggregator = aggregator.clone();
            let checkin = checkin.clone();
            DebouncedTrigger::new(
                "kb-reminders",
                Duration::from_millis(config.triggers.kb_reminders_debounce_ms),
                move |_: ()| {
                    let aggregator = aggregator.clone();
                    let checkin = checkin.clone();
                    Box::pin(async move {
                        if let Err(e) = aggregator.refresh_kb_list() {
                            warn!(error = %e, "KB reminder regeneration failed");
                        }
                        checkin.on_inbox_updated().await;
                    })
                },
            )
        };

        checkin.init();

        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Self {
            store,
            docs,
            pipeline,
            queue,
            aggregator,
            checkin,
            kb_trigger,
            purge_interval_secs: config.cache.purge_interval_secs,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Launch the background tasks: the queue consumer and the scheduled
    /// purge pass. Calling it twice would double the workers; call once.
    pub fn start(&self) {
        info!(version = APP_VERSION, "mailmind core starting");
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(
            self.queue.clone().run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(maintenance::run(
            self.pipeline.clone(),
            self.purge_interval_secs,
            self.shutdown.subscribe(),
        )));
    }

    /// Stop background tasks. In-flight work finishes; queued jobs stay
    /// persisted for the next session.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    // --- public collaborator API (§ interface exposed by the core) ----------

    /// Enqueue a message for summary/action/reply processing.
    pub fn process_message(&self, fp: Fingerprint, opts: EnqueueOptions) -> Result<()> {
        self.queue.enqueue(fp, opts)
    }

    /// Fetch (or compute) the summary artifact for a message.
    pub async fn get_summary(
        &self,
        header: &MessageHeader,
        high_priority: bool,
        cache_only: bool,
    ) -> Result<Option<Summary>> {
        self.pipeline
            .get_summary(
                header,
                FetchOptions {
                    high_priority,
                    cache_only,
                    ..FetchOptions::default()
                },
            )
            .await
    }

    /// Apply an ADD/DEL patch to the user action rules.
    pub async fn apply_action_patch(&self, patch: &str, source: &str) -> Result<()> {
        self.docs.apply_action_patch(patch, source).await
    }

    /// Apply an ADD/DEL patch to the user KB, then wake the reminder
    /// machinery.
    pub async fn apply_kb_patch(&self, patch: &str, source: &str) -> Result<()> {
        self.docs.apply_kb_patch(patch, source).await?;
        self.kb_trigger.request(());
        Ok(())
    }

    /// Build the merged reminder list.
    pub async fn build_reminder_list(&self, opts: BuildRemindersOptions) -> Result<ReminderList> {
        self.aggregator.build(opts).await
    }

    /// Suppress or restore a reminder by hash.
    pub fn set_reminder_enabled(&self, hash: &str, enabled: bool) -> Result<()> {
        self.aggregator.set_enabled(hash, enabled)
    }

    /// Notification hook: the inbox changed outside the queue's view.
    pub async fn on_inbox_updated(&self) {
        self.checkin.on_inbox_updated().await;
    }

    /// Route a mail-client event. Displayed messages take the priority
    /// lane; moves re-key the message (the fingerprint includes the
    /// folder) and, like tag changes, wake the change detector.
    pub async fn handle_mail_event(&self, event: MailEvent) -> Result<()> {
        match event {
            MailEvent::Displayed(header) => self.process_message(
                header.fingerprint(),
                EnqueueOptions {
                    priority: true,
                    source: "display".to_string(),
                    ..EnqueueOptions::default()
                },
            ),
            MailEvent::Moved { header, .. } => {
                self.process_message(
                    header.fingerprint(),
                    EnqueueOptions {
                        source: "move".to_string(),
                        ..EnqueueOptions::default()
                    },
                )?;
                self.checkin.on_inbox_updated().await;
                Ok(())
            }
            MailEvent::Tagged { .. } => {
                self.checkin.on_inbox_updated().await;
                Ok(())
            }
        }
    }

    /// Pending proactive chat message, if fresh; clears it either way.
    pub fn consume_pending_proactive_message(&self) -> Option<String> {
        self.checkin.consume_pending_proactive_message()
    }

    /// Document update notifications (`user-action-prompt-updated`,
    /// `user-kb-prompt-updated`).
    pub fn subscribe_doc_events(&self) -> broadcast::Receiver<DocEvent> {
        self.docs.subscribe()
    }

    /// Best-effort storage footprint.
    pub fn estimate_usage(&self) -> Result<StorageUsage> {
        self.store.estimate_usage().map_err(MailmindError::from)
    }

    /// Run the TTL purge pass now (the scheduled pass runs on its own).
    pub fn purge_now(&self) -> Result<usize> {
        self.pipeline.purge_expired()
    }

    /// Drop artifacts written by app versions before `min_version`.
    pub fn invalidate_older_than(&self, min_version: &str) -> Result<usize> {
        self.store
            .invalidate_older_than(min_version)
            .map_err(MailmindError::from)
    }

    /// Direct store handle, for diagnostics and tests.
    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }
}
