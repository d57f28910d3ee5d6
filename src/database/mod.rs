use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::BriefError;

pub mod schema;
pub mod queries;

pub const DB_FILE_NAME: &str = "wtftoday.db";

/// The one connection shared by the settings store, the credential store and
/// cache persistence.
pub type SharedConnection = Arc<Mutex<Connection>>;

pub fn shared(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

pub fn lock(conn: &SharedConnection) -> crate::error::Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| BriefError::Storage("database lock poisoned".to_string()))
}

pub fn init_database(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    // Enable WAL mode
    conn.pragma_update(None, "journal_mode", &"WAL")?;
    // FULL: a settings write is on disk before the command returns
    conn.pragma_update(None, "synchronous", &"FULL")?;
    conn.pragma_update(None, "foreign_keys", &"ON")?;

    // Create schema
    schema::create_tables(&conn)?;

    Ok(conn)
}

#[cfg(test)]
pub fn init_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    schema::create_tables(&conn)?;
    Ok(conn)
}
