use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailHeader {
    pub id: String,
    pub from_address: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub received_at: i64,
    pub is_unread: bool,
    pub is_important: bool,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EmailConfig {
    pub enabled: bool,
    pub imap_server: Option<String>,
    pub imap_port: Option<u16>,
    pub username: Option<String>,
}
