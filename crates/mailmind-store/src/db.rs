use rusqlite::{Connection, Result};

/// Initialise the kv table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            key     TEXT PRIMARY KEY,
            value   TEXT NOT NULL,
            version TEXT NOT NULL,
            kind    TEXT,
            ts      INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_kv_version ON kv(version);
        CREATE INDEX IF NOT EXISTS idx_kv_kind ON kv(kind);",
    )
}
