use crate::domain::{AccountId, FolderId, ThreadId};
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmailId(pub String);

impl From<String> for EmailId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EmailFlags: u8 {
        const SEEN     = 0b0000_0001;
        const ANSWERED = 0b0000_0010;
        const FLAGGED  = 0b0000_0100;
        const DELETED  = 0b0000_1000;
        const DRAFT    = 0b0001_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    None,
    Queued,
    Sending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: EmailId,
    pub account_id: AccountId,
    /// The identity key this Email was stored under (see `crate::sync::identity`).
    /// Not necessarily the raw `Message-ID` header.
    pub identity_key: String,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub plain_body: Option<String>,
    pub html_body: Option<String>,
    pub snippet: Option<String>,
    pub date_received: DateTime<Utc>,
    pub flags: EmailFlags,
    pub thread_id: ThreadId,
    pub category: String,
    pub size_bytes: u64,
    pub authentication_results: Option<String>,
    pub send_state: SendState,
    pub retry_count: u32,
}

impl Email {
    /// Stable id: 16-hex-prefix of SHA-256(account_id + "_" + identity_key).
    pub fn derive_id(account_id: &AccountId, identity_key: &str) -> EmailId {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(account_id.0.as_bytes());
        hasher.update(b"_");
        hasher.update(identity_key.as_bytes());
        let digest = hasher.finalize();
        EmailId(hex_prefix(&digest, 8))
    }
}

fn hex_prefix(bytes: &[u8], n_bytes: usize) -> String {
    bytes
        .iter()
        .take(n_bytes)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Join entity: an email can appear under multiple folders (labels).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailFolder {
    pub email_id: EmailId,
    pub folder_id: FolderId,
    pub imap_uid: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_is_deterministic_and_16_hex_chars() {
        let account_id = AccountId::from("acct-1");
        let a = Email::derive_id(&account_id, "msg-1");
        let b = Email::derive_id(&account_id, "msg-1");
        let c = Email::derive_id(&account_id, "msg-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.0.len(), 16);
        assert!(a.0.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
