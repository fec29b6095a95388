use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use mailmind_core::keys;
use mailmind_core::mail::MailClient;
use mailmind_core::types::{now_ms, EnqueueOptions, Fingerprint, ProcessorJob};
use mailmind_core::{MailmindError, Result};
use mailmind_store::KvStore;

use crate::pipeline::{ArtifactPipeline, FetchOptions};

type DrainHook = Arc<dyn Fn() + Send + Sync>;

/// Persistent retriable queue driving the artifact pipeline per
/// message. Jobs live in the store under `queue:<fp>`, so work enqueued
/// while offline survives a restart and runs on the next drain.
pub struct ProcessorQueue {
    store: Arc<KvStore>,
    pipeline: Arc<ArtifactPipeline>,
    mail: Arc<dyn MailClient>,
    notify: Notify,
    max_attempts: u32,
    /// Called after any drain that processed at least one job.
    drain_hook: Mutex<Option<DrainHook>>,
}

impl ProcessorQueue {
    pub fn new(
        store: Arc<KvStore>,
        pipeline: Arc<ArtifactPipeline>,
        mail: Arc<dyn MailClient>,
        max_attempts: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            pipeline,
            mail,
            notify: Notify::new(),
            max_attempts,
            drain_hook: Mutex::new(None),
        })
    }

    pub fn set_drain_hook(&self, hook: DrainHook) {
        *self.drain_hook.lock().unwrap() = Some(hook);
    }

    /// Enqueue a message for processing. A pending job with the same
    /// fingerprint coalesces: `priority` and `force_recompute` OR-combine
    /// into the existing entry instead of duplicating it.
    pub fn enqueue(&self, fp: Fingerprint, opts: EnqueueOptions) -> Result<()> {
        let key = keys::queue_key(&fp);
        let job = match self
            .store
            .get_json::<ProcessorJob>(&key)
            .map_err(MailmindError::from)?
        {
            Some(mut existing) => {
                existing.priority |= opts.priority;
                existing.force_recompute |= opts.force_recompute;
                debug!(fp = %fp, source = %opts.source, "coalesced into pending job");
                existing
            }
            None => ProcessorJob {
                fingerprint: fp.clone(),
                force_recompute: opts.force_recompute,
                priority: opts.priority,
                attempts: 0,
                source: opts.source,
                enqueued_at: now_ms(),
            },
        };
        self.store
            .set_json(&key, &job, Some("queue"))
            .map_err(MailmindError::from)?;
        self.notify.notify_one();
        Ok(())
    }

    /// Main loop: drain on every wake-up until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("message processor queue started");
        // Pick up jobs persisted by a previous session.
        self.notify.notify_one();
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    let processed = self.drain().await;
                    if processed > 0 {
                        let hook = self.drain_hook.lock().unwrap().clone();
                        if let Some(hook) = hook {
                            hook();
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("message processor queue shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Process every currently pending job once, priority lane first.
    /// Jobs re-enqueued by a failure wait for the next drain.
    pub async fn drain(&self) -> usize {
        let mut jobs = self.pending_jobs();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
        });

        let mut processed = 0;
        for job in jobs {
            let key = keys::queue_key(&job.fingerprint);
            match self.process(&job).await {
                Ok(()) => {
                    if let Err(e) = self.store.remove(&[key.as_str()]) {
                        warn!(fp = %job.fingerprint, error = %e, "failed to pop completed job");
                    }
                    processed += 1;
                }
                Err(e) if e.kind() == "parse_error" => {
                    // Not retried here; the next triggering event recomputes.
                    warn!(fp = %job.fingerprint, error = %e, "dropping job after parse failure");
                    let _ = self.store.remove(&[key.as_str()]);
                }
                Err(e) => {
                    let attempts = job.attempts + 1;
                    if attempts > self.max_attempts {
                        error!(
                            fp = %job.fingerprint,
                            attempts,
                            error = %e,
                            "job exceeded retry budget, dropping"
                        );
                        let _ = self.store.remove(&[key.as_str()]);
                    } else {
                        warn!(
                            fp = %job.fingerprint,
                            attempts,
                            error = %e,
                            "job failed, re-enqueued"
                        );
                        let retried = ProcessorJob { attempts, ..job };
                        let _ = self.store.set_json(&key, &retried, Some("queue"));
                    }
                }
            }
        }
        processed
    }

    /// Summary, then action, then reply, in order.
    async fn process(&self, job: &ProcessorJob) -> Result<()> {
        let header = self
            .mail
            .find_header(&job.fingerprint)
            .await
            .map_err(|e| MailmindError::Mail(e.to_string()))?;
        let Some(header) = header else {
            // Message moved or deleted since enqueue; nothing to do.
            debug!(fp = %job.fingerprint, "job target no longer resolvable, dropping");
            return Ok(());
        };

        let opts = FetchOptions {
            high_priority: job.priority,
            force_recompute: job.force_recompute,
            ..FetchOptions::default()
        };
        self.pipeline.get_summary(&header, opts.clone()).await?;
        self.pipeline.get_action(&header, opts.clone()).await?;
        self.pipeline.get_reply(&header, opts).await?;
        Ok(())
    }

    fn pending_jobs(&self) -> Vec<ProcessorJob> {
        let keys = match self.store.keys_with_prefix(keys::QUEUE_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "queue scan failed");
                return Vec::new();
            }
        };
        keys.iter()
            .filter_map(|key| self.store.get_json::<ProcessorJob>(key).ok().flatten())
            .collect()
    }

    /// Pending job count, mainly for tests and diagnostics.
    pub fn depth(&self) -> usize {
        self.pending_jobs().len()
    }
}
