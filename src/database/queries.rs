use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

// Settings

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO settings (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at",
        params![key, value, now],
    )?;
    Ok(())
}

// Credentials

pub fn get_credential(conn: &Connection, name: &str) -> Result<Option<String>> {
    let secret = conn
        .query_row(
            "SELECT secret FROM credentials WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(secret)
}

pub fn set_credential(conn: &Connection, name: &str, secret: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO credentials (name, secret, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET
            secret = excluded.secret,
            updated_at = excluded.updated_at",
        params![name, secret, now],
    )?;
    Ok(())
}

pub fn delete_credential(conn: &Connection, name: &str) -> Result<()> {
    conn.execute("DELETE FROM credentials WHERE name = ?1", params![name])?;
    Ok(())
}

pub fn clear_settings_and_credentials(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM settings", [])?;
    tx.execute("DELETE FROM credentials", [])?;
    tx.commit()?;
    Ok(())
}

// Cache snapshots

#[derive(Debug, Clone)]
pub struct CacheSnapshotRow {
    pub cache_key: String,
    pub source: String,
    pub payload: String,
    pub fetched_at: i64,
}

pub fn save_cache_snapshot(
    conn: &Connection,
    cache_key: &str,
    source: &str,
    payload: &str,
    fetched_at: i64,
) -> Result<()> {
    // One row per source: a new calendar day or location replaces the old key.
    conn.execute("DELETE FROM cache_snapshots WHERE source = ?1", params![source])?;
    conn.execute(
        "INSERT INTO cache_snapshots (cache_key, source, payload, fetched_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![cache_key, source, payload, fetched_at],
    )?;
    Ok(())
}

pub fn load_cache_snapshots(conn: &Connection) -> Result<Vec<CacheSnapshotRow>> {
    let mut stmt = conn.prepare(
        "SELECT cache_key, source, payload, fetched_at FROM cache_snapshots ORDER BY source",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CacheSnapshotRow {
                cache_key: row.get(0)?,
                source: row.get(1)?,
                payload: row.get(2)?,
                fetched_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_cache_snapshots(conn: &Connection, source: Option<&str>) -> Result<usize> {
    let deleted = match source {
        Some(source) => conn.execute("DELETE FROM cache_snapshots WHERE source = ?1", params![source])?,
        None => conn.execute("DELETE FROM cache_snapshots", [])?,
    };
    Ok(deleted)
}
