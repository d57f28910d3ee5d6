use crate::error::Result;
use crate::models::{EmailConfig, EmailHeader};

/// Placeholder for the mailbox integration.
///
/// A disabled config yields an empty inbox, and so does an enabled one until
/// an IMAP client exists. Neither case is an error.
#[derive(Debug, Default)]
pub struct EmailAdapter;

impl EmailAdapter {
    pub fn new() -> Self {
        Self
    }

    pub async fn fetch(&self, config: &EmailConfig) -> Result<Vec<EmailHeader>> {
        if config.enabled {
            log::debug!(
                "Email enabled for {:?} but no mailbox client is available yet",
                config.imap_server
            );
        }
        Ok(Vec::new())
    }
}
