use serde::{Deserialize, Serialize};

/// One stored record. `version` is the app version at write time, `kind`
/// a free-form tag, `ts` the write-or-touch time in ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvRecord {
    pub key: String,
    pub value: String,
    pub version: String,
    pub kind: Option<String>,
    pub ts: Option<i64>,
}

/// Best-effort storage footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}
