use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::database::{queries, SharedConnection};
use crate::error::{BriefError, Result};

/// An opaque credential. The backing buffer is zeroed when dropped and the
/// value is only reachable through a scoped borrow.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// get/set/clear contract for secrets keyed by source name.
pub trait CredentialStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<Secret>>;
    fn set(&self, name: &str, secret: &Secret) -> Result<()>;
    fn clear(&self, name: &str) -> Result<()>;
}

/// Service name credentials are filed under in the OS keychain.
pub const KEYCHAIN_SERVICE: &str = "wtftoday";

/// Keeps credentials in the platform keychain (Keychain, Credential Manager,
/// kernel keyutils).
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name).map_err(keychain_error)
    }

    /// Whether the keychain answers a read at all. Used to pick a fallback
    /// store on systems without one.
    pub fn is_available(&self) -> bool {
        match self.get("availability-check") {
            Ok(_) => true,
            Err(e) => {
                log::warn!("OS keychain unavailable: {}", e);
                false
            }
        }
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, name: &str) -> Result<Option<Secret>> {
        match self.entry(name)?.get_password() {
            Ok(value) => Ok(Some(Secret::from(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keychain_error(e)),
        }
    }

    fn set(&self, name: &str, secret: &Secret) -> Result<()> {
        self.entry(name)?
            .set_password(secret.expose())
            .map_err(keychain_error)
    }

    fn clear(&self, name: &str) -> Result<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keychain_error(e)),
        }
    }
}

/// Keychain errors never carry the stored value: undecodable data is
/// reported by kind only.
fn keychain_error(err: keyring::Error) -> BriefError {
    match err {
        keyring::Error::BadEncoding(_) => {
            BriefError::Storage("keychain entry is not valid UTF-8".to_string())
        }
        other => BriefError::Storage(format!("keychain: {}", other)),
    }
}

/// Keeps credentials in the local settings database, for systems without a
/// usable keychain.
pub struct SqliteCredentialStore {
    conn: SharedConnection,
}

impl SqliteCredentialStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, name: &str) -> Result<Option<Secret>> {
        let conn = crate::database::lock(&self.conn)?;
        Ok(queries::get_credential(&conn, name)?.map(Secret::from))
    }

    fn set(&self, name: &str, secret: &Secret) -> Result<()> {
        let conn = crate::database::lock(&self.conn)?;
        queries::set_credential(&conn, name, secret.expose())?;
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<()> {
        let conn = crate::database::lock(&self.conn)?;
        queries::delete_credential(&conn, name)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Secret>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, name: &str) -> Result<Option<Secret>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| BriefError::Storage("credential store lock poisoned".to_string()))?;
        Ok(entries.get(name).cloned())
    }

    fn set(&self, name: &str, secret: &Secret) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| BriefError::Storage("credential store lock poisoned".to_string()))?;
        entries.insert(name.to_string(), secret.clone());
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| BriefError::Storage("credential store lock poisoned".to_string()))?;
        entries.remove(name);
        Ok(())
    }
}
