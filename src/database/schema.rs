use anyhow::Result;
use rusqlite::Connection;

pub fn create_tables(conn: &Connection) -> Result<()> {
    // Settings table (non-secret configuration and flags)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Credentials table, only ever read through the credential store
    conn.execute(
        "CREATE TABLE IF NOT EXISTS credentials (
            name TEXT PRIMARY KEY,
            secret TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Last-known-good payload per cache key
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache_snapshots (
            cache_key TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            payload TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cache_snapshots_source ON cache_snapshots(source)",
        [],
    )?;

    Ok(())
}
