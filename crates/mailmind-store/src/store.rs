use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use mailmind_core::types::now_ms;

use crate::db::init_db;
use crate::error::Result;
use crate::types::{KvRecord, StorageUsage};

/// Mirror entry for one key. The mirror holds everything the maintenance
/// passes need so prefix scans never hit SQLite on hot paths.
#[derive(Debug, Clone)]
struct MirrorMeta {
    version: String,
    ts: Option<i64>,
}

struct Inner {
    conn: Connection,
    /// Lazily populated on the first scan-shaped operation, then kept in
    /// sync with every mutation. `None` until first use.
    mirror: Option<HashMap<String, MirrorMeta>>,
}

/// Persistent keyed store with version, kind, and timestamp columns.
///
/// Thread-safe: the connection and the key mirror live under one mutex so
/// a mutation and its mirror update are atomic with respect to other
/// callers. Batched writes run inside a single SQLite transaction.
pub struct KvStore {
    inner: Mutex<Inner>,
    version: String,
    quota_bytes: u64,
}

impl KvStore {
    pub fn new(conn: Connection, version: impl Into<String>, quota_bytes: u64) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            inner: Mutex::new(Inner { conn, mirror: None }),
            version: version.into(),
            quota_bytes,
        })
    }

    /// In-memory store for tests and scratch use.
    pub fn open_in_memory(version: impl Into<String>) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, version, u64::MAX)
    }

    // --- reads -------------------------------------------------------------

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().unwrap();
        let value = inner
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .map(Some)
            .or_else(ignore_not_found)?;
        Ok(value)
    }

    /// Fetch several keys at once; absent keys are simply missing from the
    /// returned map.
    pub fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let inner = self.inner.lock().unwrap();
        let mut out = HashMap::with_capacity(keys.len());
        let mut stmt = inner.conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
        for key in keys {
            let value = stmt
                .query_row([key], |row| row.get::<_, String>(0))
                .map(Some)
                .or_else(ignore_not_found)?;
            if let Some(v) = value {
                out.insert((*key).to_string(), v);
            }
        }
        Ok(out)
    }

    /// Fetch a map of keys, substituting the given default for each key
    /// that is not present.
    pub fn get_with_defaults(
        &self,
        defaults: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>> {
        let keys: Vec<&str> = defaults.keys().map(String::as_str).collect();
        let mut found = self.get_many(&keys)?;
        for (key, default) in defaults {
            found
                .entry(key.clone())
                .or_insert_with(|| default.clone());
        }
        Ok(found)
    }

    /// JSON-typed read.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn get_all(&self) -> Result<Vec<KvRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut stmt = inner
            .conn
            .prepare("SELECT key, value, version, kind, ts FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok(KvRecord {
                key: row.get(0)?,
                value: row.get(1)?,
                version: row.get(2)?,
                kind: row.get(3)?,
                ts: row.get(4)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_all_keys(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        ensure_mirror(&mut inner)?;
        let mut keys: Vec<String> = inner.mirror.as_ref().unwrap().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// Keys beginning with `prefix`, served from the in-memory mirror.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        ensure_mirror(&mut inner)?;
        let mut keys: Vec<String> = inner
            .mirror
            .as_ref()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    // --- writes ------------------------------------------------------------

    /// Insert or overwrite a batch of entries atomically, stamping the
    /// current app version and `ts = now`.
    pub fn set(&self, entries: &[(String, String)], kind: Option<&str>) -> Result<()> {
        let ts = now_ms();
        let mut inner = self.inner.lock().unwrap();
        let tx = inner.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO kv (key, value, version, kind, ts) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value, version = excluded.version,
                    kind = excluded.kind, ts = excluded.ts",
            )?;
            for (key, value) in entries {
                stmt.execute(rusqlite::params![key, value, self.version, kind, ts])?;
            }
        }
        tx.commit()?;

        if let Some(mirror) = inner.mirror.as_mut() {
            for (key, _) in entries {
                mirror.insert(
                    key.clone(),
                    MirrorMeta {
                        version: self.version.clone(),
                        ts: Some(ts),
                    },
                );
            }
        }
        Ok(())
    }

    /// Single-key convenience over [`set`](Self::set).
    pub fn set_one(&self, key: &str, value: &str, kind: Option<&str>) -> Result<()> {
        self.set(&[(key.to_string(), value.to_string())], kind)
    }

    /// JSON-typed write.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, kind: Option<&str>) -> Result<()> {
        self.set_one(key, &serde_json::to_string(value)?, kind)
    }

    pub fn remove(&self, keys: &[&str]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let tx = inner.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
            for key in keys {
                stmt.execute([key])?;
            }
        }
        tx.commit()?;

        if let Some(mirror) = inner.mirror.as_mut() {
            for key in keys {
                mirror.remove(*key);
            }
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.conn.execute("DELETE FROM kv", [])?;
        if let Some(mirror) = inner.mirror.as_mut() {
            mirror.clear();
        }
        Ok(())
    }

    /// Refresh `ts` on existing records. Never creates a record: touching
    /// an absent key is a no-op.
    pub fn touch(&self, keys: &[&str]) -> Result<()> {
        let ts = now_ms();
        let mut inner = self.inner.lock().unwrap();
        let tx = inner.conn.transaction()?;
        let mut touched: Vec<&str> = Vec::with_capacity(keys.len());
        {
            let mut stmt = tx.prepare_cached("UPDATE kv SET ts = ?1 WHERE key = ?2")?;
            for key in keys {
                if stmt.execute(rusqlite::params![ts, key])? > 0 {
                    touched.push(*key);
                }
            }
        }
        tx.commit()?;

        if let Some(mirror) = inner.mirror.as_mut() {
            for key in touched {
                if let Some(meta) = mirror.get_mut(key) {
                    meta.ts = Some(ts);
                }
            }
        }
        Ok(())
    }

    // --- maintenance -------------------------------------------------------

    /// Delete every record whose key begins with one of `prefixes` and
    /// whose `ts` is older than `cutoff_ts` or missing/invalid. Returns the
    /// number of records removed.
    pub fn purge_older_than_by_prefixes(
        &self,
        prefixes: &[String],
        cutoff_ts: i64,
    ) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        ensure_mirror(&mut inner)?;

        let doomed: Vec<String> = inner
            .mirror
            .as_ref()
            .unwrap()
            .iter()
            .filter(|(key, meta)| {
                prefixes.iter().any(|p| key.starts_with(p.as_str()))
                    && meta.ts.map_or(true, |ts| ts < cutoff_ts)
            })
            .map(|(key, _)| key.clone())
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }

        let tx = inner.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
            for key in &doomed {
                stmt.execute([key])?;
            }
        }
        tx.commit()?;

        let mirror = inner.mirror.as_mut().unwrap();
        for key in &doomed {
            mirror.remove(key);
        }
        debug!(count = doomed.len(), cutoff_ts, "purged expired records");
        Ok(doomed.len())
    }

    /// Delete all records whose version lexicographically precedes
    /// `min_version`. Used on upgrade to drop stale-format artifacts.
    pub fn invalidate_older_than(&self, min_version: &str) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        ensure_mirror(&mut inner)?;

        let doomed: Vec<String> = inner
            .mirror
            .as_ref()
            .unwrap()
            .iter()
            .filter(|(_, meta)| meta.version.as_str() < min_version)
            .map(|(key, _)| key.clone())
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }

        let tx = inner.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
            for key in &doomed {
                stmt.execute([key])?;
            }
        }
        tx.commit()?;

        let mirror = inner.mirror.as_mut().unwrap();
        for key in &doomed {
            mirror.remove(key);
        }
        warn!(count = doomed.len(), min_version, "invalidated stale-version records");
        Ok(doomed.len())
    }

    /// Best-effort footprint from the SQLite page pragmas.
    pub fn estimate_usage(&self) -> Result<StorageUsage> {
        let inner = self.inner.lock().unwrap();
        let used: i64 = inner.conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(StorageUsage {
            used_bytes: used.max(0) as u64,
            quota_bytes: self.quota_bytes,
        })
    }
}

fn ensure_mirror(inner: &mut Inner) -> Result<()> {
    if inner.mirror.is_some() {
        return Ok(());
    }
    let mut mirror = HashMap::new();
    {
        let mut stmt = inner.conn.prepare("SELECT key, version, ts FROM kv")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        })?;
        for row in rows {
            let (key, version, ts) = row?;
            mirror.insert(key, MirrorMeta { version, ts });
        }
    }
    debug!(keys = mirror.len(), "key mirror populated");
    inner.mirror = Some(mirror);
    Ok(())
}

fn ignore_not_found<T>(e: rusqlite::Error) -> std::result::Result<Option<T>, crate::StoreError> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    }
}
