use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use mailmind_core::keys::{ACTION_RULES_DOC, USER_KB_DOC};
use mailmind_core::{MailmindError, Result};
use mailmind_store::KvStore;
use mailmind_sync::EditChain;

use crate::patch::{apply_patch, PatchTarget};

pub const ACTION_RULES_UPDATED: &str = "user-action-prompt-updated";
pub const USER_KB_UPDATED: &str = "user-kb-prompt-updated";

/// Seeded on first read so ADD always has its four sections to land in.
const DEFAULT_ACTION_RULES: &str = "\
# Emails to be marked as `delete` (DO NOT EDIT/DELETE THIS SECTION HEADER)

# Emails to be marked as `archive` (DO NOT EDIT/DELETE THIS SECTION HEADER)

# Emails to be marked as `reply` (DO NOT EDIT/DELETE THIS SECTION HEADER)

# Emails to be marked as `none` (DO NOT EDIT/DELETE THIS SECTION HEADER)
";

const DEFAULT_USER_KB: &str = "# What I know about the user\n";

/// Fired after a successful patch application, carrying the storage key
/// and the originating source tag.
#[derive(Debug, Clone)]
pub struct DocEvent {
    pub event: &'static str,
    pub key: &'static str,
    pub source: String,
}

/// Owns the two singleton documents. All writes flow through per-document
/// edit chains, so edits are strictly serial and an error in one queued
/// edit never cancels the next.
pub struct DocumentManager {
    store: Arc<KvStore>,
    action_chain: EditChain,
    kb_chain: EditChain,
    events: broadcast::Sender<DocEvent>,
}

impl DocumentManager {
    pub fn new(store: Arc<KvStore>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            store,
            action_chain: EditChain::new("action-rules"),
            kb_chain: EditChain::new("user-kb"),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocEvent> {
        self.events.subscribe()
    }

    /// Current action rules text (default template when unset).
    pub fn action_rules(&self) -> Result<String> {
        Ok(self
            .store
            .get(ACTION_RULES_DOC)
            .map_err(MailmindError::from)?
            .unwrap_or_else(|| DEFAULT_ACTION_RULES.to_string()))
    }

    /// Current user KB text (default template when unset).
    pub fn user_kb(&self) -> Result<String> {
        Ok(self
            .store
            .get(USER_KB_DOC)
            .map_err(MailmindError::from)?
            .unwrap_or_else(|| DEFAULT_USER_KB.to_string()))
    }

    /// Apply an ADD/DEL patch to the action rules document.
    pub async fn apply_action_patch(&self, patch: &str, source: &str) -> Result<()> {
        self.apply(
            &self.action_chain,
            ACTION_RULES_DOC,
            DEFAULT_ACTION_RULES,
            PatchTarget::ActionRules,
            ACTION_RULES_UPDATED,
            patch,
            source,
        )
        .await
    }

    /// Apply an ADD/DEL patch to the user KB document.
    pub async fn apply_kb_patch(&self, patch: &str, source: &str) -> Result<()> {
        self.apply(
            &self.kb_chain,
            USER_KB_DOC,
            DEFAULT_USER_KB,
            PatchTarget::KnowledgeBase,
            USER_KB_UPDATED,
            patch,
            source,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        chain: &EditChain,
        key: &'static str,
        default_doc: &'static str,
        target: PatchTarget,
        event: &'static str,
        patch: &str,
        source: &str,
    ) -> Result<()> {
        let store = self.store.clone();
        let patch = patch.to_string();

        let outcome: Result<()> = chain
            .run(async move {
                let doc = store
                    .get(key)
                    .map_err(MailmindError::from)?
                    .unwrap_or_else(|| default_doc.to_string());
                let updated = apply_patch(&doc, &patch, target)?;
                if updated != doc {
                    store
                        .set_one(key, &updated, Some("doc"))
                        .map_err(MailmindError::from)?;
                }
                Ok(())
            })
            .await
            .map_err(|_| MailmindError::Internal("edit chain closed".to_string()))?;

        match &outcome {
            Ok(()) => {
                info!(key, source, "document patch applied");
                // Nobody listening is fine; the send result is advisory.
                let _ = self.events.send(DocEvent {
                    event,
                    key,
                    source: source.to_string(),
                });
            }
            Err(e) => warn!(key, source, error = %e, "document patch rejected"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> DocumentManager {
        DocumentManager::new(Arc::new(KvStore::open_in_memory("0.3.1").unwrap()))
    }

    #[tokio::test]
    async fn action_patch_persists_and_notifies() {
        let m = manager();
        let mut events = m.subscribe();

        m.apply_action_patch("ADD\narchive\n- Noisy newsletters.", "test")
            .await
            .unwrap();

        let doc = m.action_rules().unwrap();
        assert!(doc.contains("- Noisy newsletters."));

        let ev = events.try_recv().unwrap();
        assert_eq!(ev.event, ACTION_RULES_UPDATED);
        assert_eq!(ev.key, ACTION_RULES_DOC);
        assert_eq!(ev.source, "test");
    }

    #[tokio::test]
    async fn failed_patch_leaves_document_unchanged() {
        let m = manager();
        let before = m.action_rules().unwrap();
        let err = m
            .apply_action_patch("DEL\narchive\n- Never existed.", "test")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "patch_error");
        assert_eq!(m.action_rules().unwrap(), before);
    }

    #[tokio::test]
    async fn failed_edit_does_not_block_the_next() {
        let m = manager();
        let bad = m.apply_action_patch("DEL\narchive\n- Ghost.", "a").await;
        assert!(bad.is_err());
        m.apply_action_patch("ADD\narchive\n- Real rule.", "b")
            .await
            .unwrap();
        assert!(m.action_rules().unwrap().contains("- Real rule."));
    }

    #[tokio::test]
    async fn kb_patch_appends() {
        let m = manager();
        m.apply_kb_patch("ADD\n- Prefers morning meetings.", "chat")
            .await
            .unwrap();
        let kb = m.user_kb().unwrap();
        assert!(kb.contains("- Prefers morning meetings."));
    }
}
