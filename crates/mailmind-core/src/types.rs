use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Current wall-clock time in integer milliseconds.
///
/// All persisted `ts` values in the store use this frame; TTL arithmetic is
/// `cutoff = now_ms() - ttl_secs * 1000`.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Stable per-message identity: wire Message-Id combined with the folder
/// path. Equal fingerprints across sessions denote the same logical
/// message. Used as the cache-key suffix and the semaphore key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint for a message. Angle brackets around the wire
    /// Message-Id are not significant and are stripped first.
    pub fn derive(message_id: &str, folder: &str) -> Self {
        let id = message_id.trim().trim_start_matches('<').trim_end_matches('>');
        Self(format!("{id}#{folder}"))
    }

    /// Wrap an already-derived fingerprint string (e.g. read back from a
    /// storage key).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Header fields the core needs from the mail client. The client-native
/// message id (`id`) is only meaningful within the current session; the
/// fingerprint is the durable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Client-native id, opaque to the core.
    pub id: String,
    /// Wire Message-Id header.
    pub message_id: String,
    /// Folder path the message currently lives in.
    pub folder: String,
    pub subject: String,
    pub author: String,
    pub recipients: Vec<String>,
    /// Message date in ms.
    pub date_ms: i64,
}

impl MessageHeader {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::derive(&self.message_id, &self.folder)
    }
}

/// The three artifact kinds the pipeline produces. `as_str` doubles as the
/// storage key prefix component (`summary:<fp>` etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Summary,
    Action,
    Reply,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Summary => "summary",
            ArtifactKind::Action => "action",
            ArtifactKind::Reply => "reply",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dated or undated actionable item extracted from a message summary or
/// from the user KB. This is the pre-aggregation shape; the aggregator
/// wraps it into a [`Reminder`] with source, hash, and enabled state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderNote {
    /// Non-empty reminder text.
    pub content: String,
    /// `YYYY-MM-DD`, or `None` for undated reminders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    /// `HH:MM`, or `None` when only the day is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_time: Option<String>,
}

/// Where an aggregated reminder came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderSource {
    Message,
    Kb,
}

/// A fully aggregated reminder as returned by `build_reminder_list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_time: Option<String>,
    pub source: ReminderSource,
    /// Stable key: `m:<fingerprint>` for message-derived reminders,
    /// `k:<djb2(content)>` for KB-derived ones.
    pub hash: String,
    /// Message-derived reminders carry the originating fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<Fingerprint>,
    pub enabled: bool,
}

/// Per-reminder-source counts reported alongside an aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderCounts {
    pub total: usize,
    pub message: usize,
    pub kb: usize,
    pub disabled: usize,
}

/// Output of a reminder aggregation build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderList {
    pub reminders: Vec<Reminder>,
    pub counts: ReminderCounts,
    pub generated_at: i64,
}

/// Message summary artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Two-line blurb shown in the message list.
    pub blurb: String,
    /// Longer prose summary. Empty when the model produced none.
    pub detailed: String,
    /// Bulleted todo lines, `•`-prefixed. Empty when none.
    pub todos: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder: Option<ReminderNote>,
    /// Fingerprint of the summarized message.
    pub id: Fingerprint,
}

/// Classification verdict for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Reply,
    Archive,
    Delete,
    None,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Reply => "reply",
            Classification::Archive => "archive",
            Classification::Delete => "delete",
            Classification::None => "none",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reply" => Ok(Classification::Reply),
            "archive" => Ok(Classification::Archive),
            "delete" => Ok(Classification::Delete),
            "none" => Ok(Classification::None),
            _ => Err(()),
        }
    }
}

/// Classification action artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionVerdict {
    pub classification: Classification,
    pub justification: String,
}

/// Pre-drafted reply artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyDraft {
    pub body: String,
}

/// Tagged sum of everything the pipeline can cache for a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Artifact {
    Summary(Summary),
    Action(ActionVerdict),
    Reply(ReplyDraft),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Summary(_) => ArtifactKind::Summary,
            Artifact::Action(_) => ArtifactKind::Action,
            Artifact::Reply(_) => ArtifactKind::Reply,
        }
    }
}

/// Events observed from the mail client. Display events feed the
/// processor queue's priority lane; moves and tag changes wake the
/// reminder/check-in machinery.
#[derive(Debug, Clone)]
pub enum MailEvent {
    Displayed(MessageHeader),
    Moved {
        header: MessageHeader,
        from_folder: String,
    },
    Tagged {
        header: MessageHeader,
        tags: Vec<String>,
    },
}

/// Queue element driving the per-message processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorJob {
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub force_recompute: bool,
    #[serde(default)]
    pub priority: bool,
    #[serde(default)]
    pub attempts: u32,
    /// Free-form tag describing who enqueued the job.
    pub source: String,
    /// Enqueue time in ms; the FIFO order key within a priority lane.
    pub enqueued_at: i64,
}

/// Options for `process_message` enqueue calls.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: bool,
    pub force_recompute: bool,
    pub source: String,
}

/// Options for `build_reminder_list`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildRemindersOptions {
    pub include_disabled: bool,
}

/// Outcome of a proactive check-in run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinOutcome {
    ReachedOut,
    NoAction,
    Error,
    Empty,
}

impl fmt::Display for CheckinOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckinOutcome::ReachedOut => "reached_out",
            CheckinOutcome::NoAction => "no_action",
            CheckinOutcome::Error => "error",
            CheckinOutcome::Empty => "empty",
        };
        f.write_str(s)
    }
}
