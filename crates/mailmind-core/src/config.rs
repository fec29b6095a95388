use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// App version recorded on every store write; `invalidate_older_than`
/// compares against it lexicographically.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seconds without bytes before an LLM event-stream read is abandoned.
pub const STREAM_IDLE_TIMEOUT_SECS: u64 = 60;
/// Upper bound for a single throttle-loop sleep.
pub const THROTTLE_SLEEP_CAP_MS: u64 = 5_000;
/// Throttle sleep growth factor per consecutive 429.
pub const THROTTLE_BACKOFF_FACTOR: f64 = 1.5;

/// Top-level config (mailmind.toml + MAILMIND_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MailmindConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub triggers: TriggersConfig,
    #[serde(default)]
    pub checkin: CheckinConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Global concurrency cap on outbound LLM calls.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Retry budget for network-class failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial retry backoff in ms; doubles per attempt.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_workers: default_max_workers(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_summary_ttl")]
    pub summary_ttl_secs: i64,
    #[serde(default = "default_action_ttl")]
    pub action_ttl_secs: i64,
    #[serde(default = "default_reply_ttl")]
    pub reply_ttl_secs: i64,
    /// Cadence of the maintenance purge pass.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
    /// Reported quota for `estimate_usage`.
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            summary_ttl_secs: default_summary_ttl(),
            action_ttl_secs: default_action_ttl(),
            reply_ttl_secs: default_reply_ttl(),
            purge_interval_secs: default_purge_interval(),
            quota_bytes: default_quota_bytes(),
        }
    }
}

impl CacheConfig {
    /// TTL in seconds for the given artifact kind.
    pub fn ttl_secs(&self, kind: crate::types::ArtifactKind) -> i64 {
        use crate::types::ArtifactKind::*;
        match kind {
            Summary => self.summary_ttl_secs,
            Action => self.action_ttl_secs,
            Reply => self.reply_ttl_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Jobs exceeding this attempt count are dropped as fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggersConfig {
    /// Quiet period for the KB-reminder regeneration trigger.
    #[serde(default = "default_kb_debounce")]
    pub kb_reminders_debounce_ms: u64,
    /// Quiet period for arming a proactive check-in.
    #[serde(default = "default_checkin_debounce")]
    pub checkin_debounce_ms: u64,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            kb_reminders_debounce_ms: default_kb_debounce(),
            checkin_debounce_ms: default_checkin_debounce(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinConfig {
    /// Minimum gap between two check-in runs; also the freshness window
    /// for consuming a pending proactive message.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: i64,
    /// Turns of recent chat history included in the check-in prompt.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for CheckinConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            history_turns: default_history_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.mailmind.dev".to_string()
}
fn default_model() -> String {
    "mailmind-std-1".to_string()
}
fn default_max_workers() -> usize {
    3
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_summary_ttl() -> i64 {
    30 * 24 * 3600
}
fn default_action_ttl() -> i64 {
    30 * 24 * 3600
}
fn default_reply_ttl() -> i64 {
    7 * 24 * 3600
}
fn default_purge_interval() -> u64 {
    6 * 3600
}
fn default_quota_bytes() -> u64 {
    512 * 1024 * 1024
}
fn default_max_attempts() -> u32 {
    3
}
fn default_kb_debounce() -> u64 {
    2_000
}
fn default_checkin_debounce() -> u64 {
    30_000
}
fn default_cooldown_ms() -> i64 {
    30 * 60 * 1000
}
fn default_history_turns() -> usize {
    10
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.mailmind/mailmind.db")
}

impl MailmindConfig {
    /// Load config from a TOML file with MAILMIND_* env var overrides.
    /// A missing file yields the defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MailmindConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MAILMIND_").split("_"))
            .extract()
            .map_err(|e| crate::error::MailmindError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.mailmind/mailmind.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = MailmindConfig::default();
        assert!(cfg.llm.max_workers >= 2);
        assert!(cfg.cache.summary_ttl_secs > 0);
        assert!(cfg.checkin.cooldown_ms > 0);
    }

    #[test]
    fn ttl_lookup_per_kind() {
        let cfg = CacheConfig::default();
        assert_eq!(
            cfg.ttl_secs(crate::types::ArtifactKind::Reply),
            cfg.reply_ttl_secs
        );
    }
}
