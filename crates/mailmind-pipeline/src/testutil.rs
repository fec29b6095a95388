//! Shared stubs for pipeline and queue tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mailmind_core::config::{CacheConfig, LlmConfig};
use mailmind_core::mail::{
    Auth, AuthError, MailClient, MailError, NullStatusSink, Privacy,
};
use mailmind_core::types::{now_ms, ArtifactKind, Fingerprint, MessageHeader};
use mailmind_docs::DocumentManager;
use mailmind_llm::{LlmGate, LlmTransport, TransportBody, TransportError, TransportRequest};
use mailmind_store::KvStore;

use crate::pipeline::ArtifactPipeline;

pub fn summary_text(text: &str) -> serde_json::Value {
    serde_json::json!({ "content": text, "model": "stub", "stop_reason": "end" })
}

/// Scripted transport: pops the front reply per send, counts calls.
pub struct CountingTransport {
    script: Mutex<Vec<serde_json::Value>>,
    pub calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl LlmTransport for CountingTransport {
    async fn send(&self, _req: &TransportRequest) -> Result<TransportBody, TransportError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                summary_text("Two-line summary: default")
            } else {
                script.remove(0)
            }
        };
        Ok(TransportBody::Json(next))
    }
}

pub struct StubAuth;

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

pub struct StubPrivacy;

#[async_trait]
impl Privacy for StubPrivacy {
    async fn ai_blocked(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct StubMail {
    headers: Mutex<Vec<MessageHeader>>,
    internal: Mutex<HashSet<String>>,
    replied: Mutex<HashSet<String>>,
    bodies: Mutex<HashMap<String, String>>,
}

impl StubMail {
    pub fn add_header(&self, header: MessageHeader) {
        self.headers.lock().unwrap().push(header);
    }

    pub fn mark_internal(&self, header: &MessageHeader) {
        self.internal
            .lock()
            .unwrap()
            .insert(header.message_id.clone());
    }

    pub fn mark_replied(&self, header: &MessageHeader) {
        self.replied
            .lock()
            .unwrap()
            .insert(header.fingerprint().to_string());
    }

    pub fn remove_header(&self, fp: &Fingerprint) {
        self.headers
            .lock()
            .unwrap()
            .retain(|h| &h.fingerprint() != fp);
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

    async fn get_body(&self, header: &MessageHeader) -> Result<String, MailError> {
        Ok(self
            .bodies
            .lock()
            .unwrap()
            .get(&header.message_id)
            .cloned()
            .unwrap_or_else(|| "Hello,\n\nplease review the attached notes.".to_string()))
    }

    async fn move_message(&self, _header: &MessageHeader, _folder: &str) -> Result<(), MailError> {
        Ok(())
    }

    async fn set_tags(&self, _header: &MessageHeader, _tags: &[String]) -> Result<(), MailError> {
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
        "Test User".to_string()
    }
}

pub struct TestRig {
    pub store: Arc<KvStore>,
    pub transport: Arc<CountingTransport>,
    pub mail: Arc<StubMail>,
    pub docs: Arc<DocumentManager>,
    pub pipeline: Arc<ArtifactPipeline>,
}

impl TestRig {
    pub fn new(replies: Vec<serde_json::Value>) -> Self {
        Self::build(replies, Duration::from_millis(0))
    }

    pub fn slow(replies: Vec<serde_json::Value>, delay: Duration) -> Self {
        Self::build(replies, delay)
    }

    fn build(replies: Vec<serde_json::Value>, delay: Duration) -> Self {
        let store = Arc::new(KvStore::open_in_memory("0.3.1").unwrap());
        let transport = Arc::new(CountingTransport {
            script: Mutex::new(replies),
            calls: AtomicUsize::new(0),
            delay,
        });
        let gate = Arc::new(LlmGate::new(
            transport.clone(),
            Arc::new(StubAuth),
            Arc::new(StubPrivacy),
            Arc::new(NullStatusSink),
            &LlmConfig {
                max_retries: 0,
                ..LlmConfig::default()
            },
        ));
        let mail = Arc::new(StubMail::default());
        let docs = Arc::new(DocumentManager::new(store.clone()));
        let pipeline = Arc::new(ArtifactPipeline::new(
            store.clone(),
            gate,
            mail.clone(),
            docs.clone(),
            CacheConfig::default(),
        ));
        Self {
            store,
            transport,
            mail,
            docs,
            pipeline,
        }
    }

    /// Register and return a header for the given wire Message-Id.
    pub fn header(&self, message_id: &str) -> MessageHeader {
        let header = MessageHeader {
            id: message_id.to_string(),
            message_id: message_id.to_string(),
            folder: "INBOX".to_string(),
            subject: format!("About {message_id}"),
            author: "sender@example.com".to_string(),
            recipients: vec!["me@example.com".to_string()],
            date_ms: now_ms(),
        };
        self.mail.add_header(header.clone());
        header
    }

    /// Current meta-record ts column for an artifact.
    pub fn meta_ts(&self, kind: ArtifactKind, fp: &Fingerprint) -> i64 {
        let key = mailmind_core::keys::meta_key(kind, fp);
        self.store
            .get_all()
            .unwrap()
            .into_iter()
            .find(|r| r.key == key)
            .and_then(|r| r.ts)
            .unwrap_or(0)
    }
}
