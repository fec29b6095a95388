use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mailmind_core::config::CacheConfig;
use mailmind_core::keys;
use mailmind_core::mail::MailClient;
use mailmind_core::types::{
    now_ms, ActionVerdict, ArtifactKind, Fingerprint, MessageHeader, ReplyDraft, Summary,
};
use mailmind_core::{MailmindError, Result};
use mailmind_docs::DocumentManager;
use mailmind_llm::{ChatMessage, ChatOptions, LlmGate};
use mailmind_store::KvStore;
use mailmind_sync::{KeyedSemaphores, SingleFlightSet};

use crate::parse;
use crate::prompts;

/// Per-fetch options.
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// Fast-path UI request: the LLM call bypasses the worker semaphore.
    pub high_priority: bool,
    /// Return the cached value or `None`; never compute.
    pub cache_only: bool,
    /// Skip the cache probe and overwrite the stored artifact.
    pub force_recompute: bool,
    pub cancel: CancellationToken,
}

/// One processor per artifact kind, sharing the same skeleton:
/// cache-first read, per-fingerprint permit, double-checked re-read,
/// materialize inputs, one LLM call, parse, atomic payload+meta write.
pub struct ArtifactPipeline {
    store: Arc<KvStore>,
    gate: Arc<LlmGate>,
    mail: Arc<dyn MailClient>,
    docs: Arc<DocumentManager>,
    cache: CacheConfig,
    permits: KeyedSemaphores<Fingerprint>,
    /// Reject-if-busy guard on top of the permit: UI event flurries can
    /// re-enter `get_reply` before the first call reaches the permit.
    reply_flights: SingleFlightSet<Fingerprint>,
}

impl ArtifactPipeline {
    pub fn new(
        store: Arc<KvStore>,
        gate: Arc<LlmGate>,
        mail: Arc<dyn MailClient>,
        docs: Arc<DocumentManager>,
        cache: CacheConfig,
    ) -> Self {
        Self {
            store,
            gate,
            mail,
            docs,
            cache,
            permits: KeyedSemaphores::new(),
            reply_flights: SingleFlightSet::new(),
        }
    }

    // --- summary -----------------------------------------------------------

    pub async fn get_summary(
        &self,
        header: &MessageHeader,
        opts: FetchOptions,
    ) -> Result<Option<Summary>> {
        let fp = header.fingerprint();

        if !opts.force_recompute {
            if let Some(hit) = self.cached::<Summary>(ArtifactKind::Summary, &fp)? {
                self.touch_meta(ArtifactKind::Summary, &fp);
                return Ok(Some(hit));
            }
        }
        if opts.cache_only {
            return Ok(None);
        }

        let _permit = self.permits.acquire(fp.clone()).await;

        if !opts.force_recompute {
            if let Some(hit) = self.cached::<Summary>(ArtifactKind::Summary, &fp)? {
                self.touch_meta(ArtifactKind::Summary, &fp);
                return Ok(Some(hit));
            }
        }

        let body = self
            .mail
            .get_body(header)
            .await
            .map_err(|e| MailmindError::Mail(e.to_string()))?;
        let kb = self.docs.user_kb()?;

        let text = self
            .chat(prompts::summary_prompt(header, &body, &kb), &opts)
            .await?;
        let summary = parse::parse_summary(&text, &fp)?;

        self.write_artifact(ArtifactKind::Summary, &fp, &summary, Vec::new())?;
        debug!(fp = %fp, "summary computed and cached");
        Ok(Some(summary))
    }

    // --- action ------------------------------------------------------------

    pub async fn get_action(
        &self,
        header: &MessageHeader,
        opts: FetchOptions,
    ) -> Result<Option<ActionVerdict>> {
        // Internal/self-sent messages never get a cached action.
        if self.mail.is_internal(header) {
            debug!(subject = %header.subject, "internal message, skipping action");
            return Ok(None);
        }

        let fp = header.fingerprint();

        if !opts.force_recompute {
            if let Some(hit) = self.cached::<ActionVerdict>(ArtifactKind::Action, &fp)? {
                self.touch_meta(ArtifactKind::Action, &fp);
                return Ok(Some(hit));
            }
        }
        if opts.cache_only {
            return Ok(None);
        }

        let _permit = self.permits.acquire(fp.clone()).await;

        if !opts.force_recompute {
            if let Some(hit) = self.cached::<ActionVerdict>(ArtifactKind::Action, &fp)? {
                self.touch_meta(ArtifactKind::Action, &fp);
                return Ok(Some(hit));
            }
        }

        let body = self
            .mail
            .get_body(header)
            .await
            .map_err(|e| MailmindError::Mail(e.to_string()))?;
        let rules = self.docs.action_rules()?;

        let text = self
            .chat(prompts::action_prompt(header, &body, &rules), &opts)
            .await?;
        let verdict = parse::parse_action(&text)?;

        // Alongside the payload: the justification, the rules snapshot the
        // verdict was computed against, and (first time only) the original
        // classification.
        let mut extra = vec![
            (
                keys::action_justification_key(&fp),
                verdict.justification.clone(),
            ),
            (keys::action_userprompt_key(&fp), rules),
        ];
        let orig_key = keys::action_orig_key(&fp);
        if self.store.get(&orig_key).map_err(MailmindError::from)?.is_none() {
            extra.push((orig_key, verdict.classification.to_string()));
        }
        self.write_artifact(ArtifactKind::Action, &fp, &verdict, extra)?;
        debug!(fp = %fp, classification = %verdict.classification, "action computed and cached");
        Ok(Some(verdict))
    }

    // --- reply -------------------------------------------------------------

    pub async fn get_reply(
        &self,
        header: &MessageHeader,
        opts: FetchOptions,
    ) -> Result<Option<ReplyDraft>> {
        let fp = header.fingerprint();

        // Stub-independent cache probe before entering single-flight.
        if !opts.force_recompute {
            if let Some(hit) = self.cached::<ReplyDraft>(ArtifactKind::Reply, &fp)? {
                self.touch_meta(ArtifactKind::Reply, &fp);
                return Ok(Some(hit));
            }
        }
        if opts.cache_only {
            return Ok(None);
        }

        let Some(_flight) = self.reply_flights.try_begin(fp.clone()) else {
            debug!(fp = %fp, "reply request already in flight");
            return Ok(None);
        };

        let _permit = self.permits.acquire(fp.clone()).await;

        if !opts.force_recompute {
            if let Some(hit) = self.cached::<ReplyDraft>(ArtifactKind::Reply, &fp)? {
                self.touch_meta(ArtifactKind::Reply, &fp);
                return Ok(Some(hit));
            }
        }

        let body = self
            .mail
            .get_body(header)
            .await
            .map_err(|e| MailmindError::Mail(e.to_string()))?;
        let kb = self.docs.user_kb()?;
        // Cache-only: never trigger a summary computation from here.
        let sibling = self
            .get_summary(
                header,
                FetchOptions {
                    cache_only: true,
                    ..FetchOptions::default()
                },
            )
            .await?;

        let text = self
            .chat(
                prompts::reply_prompt(header, &body, &kb, sibling.as_ref()),
                &opts,
            )
            .await?;
        let draft = ReplyDraft {
            body: parse::parse_reply(&text)?,
        };

        self.write_artifact(ArtifactKind::Reply, &fp, &draft, Vec::new())?;
        debug!(fp = %fp, "reply drafted and cached");
        Ok(Some(draft))
    }

    // --- maintenance ---------------------------------------------------------

    /// TTL purge pass over every artifact kind, plus the orphan rule:
    /// payloads whose meta record is gone count as expired on the same
    /// pass. Returns the number of records removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for kind in [ArtifactKind::Summary, ArtifactKind::Action, ArtifactKind::Reply] {
            let cutoff = now_ms() - self.cache.ttl_secs(kind) * 1000;
            removed += self
                .store
                .purge_older_than_by_prefixes(
                    &[keys::payload_prefix(kind), keys::meta_prefix(kind)],
                    cutoff,
                )
                .map_err(MailmindError::from)?;
            removed += self.remove_orphans(kind)?;
        }
        if removed > 0 {
            debug!(removed, "artifact purge pass complete");
        }
        Ok(removed)
    }

    fn remove_orphans(&self, kind: ArtifactKind) -> Result<usize> {
        let all = self
            .store
            .keys_with_prefix(&keys::payload_prefix(kind))
            .map_err(MailmindError::from)?;
        let meta_prefix = keys::meta_prefix(kind);
        let metas: HashSet<&str> = all
            .iter()
            .filter_map(|k| k.strip_prefix(meta_prefix.as_str()))
            .collect();

        // Side records under the action prefix are not payloads.
        const SIDE_PREFIXES: [&str; 3] =
            ["action:orig:", "action:justification:", "action:userprompt:"];

        let payload_prefix = keys::payload_prefix(kind);
        let doomed: Vec<&str> = all
            .iter()
            .filter(|k| !k.starts_with(meta_prefix.as_str()))
            .filter(|k| !SIDE_PREFIXES.iter().any(|s| k.starts_with(s)))
            .filter(|k| {
                let fp = k.strip_prefix(payload_prefix.as_str()).unwrap_or(k.as_str());
                !metas.contains(fp)
            })
            .map(String::as_str)
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }
        warn!(kind = %kind, count = doomed.len(), "removing orphaned payloads");
        self.store.remove(&doomed).map_err(MailmindError::from)?;
        Ok(doomed.len())
    }

    // --- shared skeleton -----------------------------------------------------

    fn cached<T: DeserializeOwned>(&self, kind: ArtifactKind, fp: &Fingerprint) -> Result<Option<T>> {
        self.store
            .get_json(&keys::payload_key(kind, fp))
            .map_err(MailmindError::from)
    }

    /// Refresh the meta timestamp off the caller's path.
    fn touch_meta(&self, kind: ArtifactKind, fp: &Fingerprint) {
        let store = self.store.clone();
        let key = keys::meta_key(kind, fp);
        tokio::spawn(async move {
            if let Err(e) = store.touch(&[key.as_str()]) {
                warn!(key = %key, error = %e, "meta touch failed");
            }
        });
    }

    async fn chat(&self, prompt: String, opts: &FetchOptions) -> Result<String> {
        let chat_opts = ChatOptions {
            ignore_semaphore: opts.high_priority,
            cancel: opts.cancel.clone(),
            ..ChatOptions::default()
        };
        Ok(self
            .gate
            .chat(vec![ChatMessage::system(prompt)], chat_opts)
            .await?)
    }

    /// Payload, meta, and any side records land in one transaction.
    fn write_artifact<T: Serialize>(
        &self,
        kind: ArtifactKind,
        fp: &Fingerprint,
        value: &T,
        mut extra: Vec<(String, String)>,
    ) -> Result<()> {
        let payload =
            serde_json::to_string(value).map_err(|e| MailmindError::Internal(e.to_string()))?;
        let mut entries = vec![
            (keys::payload_key(kind, fp), payload),
            (keys::meta_key(kind, fp), now_ms().to_string()),
        ];
        entries.append(&mut extra);
        self.store
            .set(&entries, Some(kind.as_str()))
            .map_err(MailmindError::from)
    }
}
