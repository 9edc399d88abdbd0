//! Collaborator traits the core is built against but does not implement.
//! A durable store, an OS keychain, a provider database and a MIME encoder
//! are all external to the sync core proper; these traits are the contract
//! `sync`/`credentials`/`discovery` code is written against, mirroring how
//! the donor's `cache::Cache` sits behind its own inherent methods but here
//! made swappable (an in-process mock implements each trait for tests
//! instead of a real SQLite/keychain/registry).

use async_trait::async_trait;

use crate::domain::{Account, AccountId, Attachment, Email, EmailFolder, EmailId, Folder, FolderId, ProviderConfig, Thread, ThreadId};
use crate::error::{CredentialError, MimeError, SyncError};

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<Account>, SyncError>;
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, SyncError>;
    async fn upsert_account(&self, account: &Account) -> Result<(), SyncError>;
    async fn list_folders(&self, account_id: &AccountId) -> Result<Vec<Folder>, SyncError>;
    async fn upsert_folder(&self, folder: &Folder) -> Result<(), SyncError>;
    async fn delete_folder_memberships(&self, folder_id: &FolderId) -> Result<(), SyncError>;
}

#[async_trait]
pub trait EmailRepository: Send + Sync {
    /// Looks up an existing email by its identity key, for dedup during
    /// ingest. Scoped to a single account per the canonical-identity
    /// resolution decision (no cross-account merging). Returns the full
    /// record (not just the id) since identity resolution needs to inspect
    /// the matched email's `message_id`/`identity_key` to decide reuse.
    async fn find_by_identity_key(&self, account_id: &AccountId, identity_key: &str) -> Result<Option<Email>, SyncError>;
    /// Looks up an existing email by its raw `Message-ID` header, for the
    /// conflict check in identity resolution and the `In-Reply-To`/
    /// `References` lookups in thread resolution.
    async fn find_by_message_id(&self, account_id: &AccountId, message_id: &str) -> Result<Option<Email>, SyncError>;
    /// IMAP uids already linked to this folder, for subtracting out of a
    /// freshly `UID SEARCH`ed candidate list before fetching (§4.9 step 4).
    async fn known_uids(&self, folder_id: &FolderId) -> Result<std::collections::HashSet<u32>, SyncError>;
    async fn upsert_email(&self, email: &Email) -> Result<(), SyncError>;
    async fn link_to_folder(&self, membership: &EmailFolder) -> Result<(), SyncError>;
    async fn unlink_from_folder(&self, email_id: &EmailId, folder_id: &FolderId) -> Result<(), SyncError>;
    async fn save_attachment(&self, attachment: &Attachment) -> Result<(), SyncError>;
    async fn get_thread(&self, thread_id: &ThreadId) -> Result<Option<Thread>, SyncError>;
    async fn upsert_thread(&self, thread: &Thread) -> Result<(), SyncError>;
    /// Candidate threads for subject+window fallback matching (see
    /// `sync::thread_resolve`), pre-filtered to the account and a
    /// 30-day-or-narrower window by the caller.
    async fn find_threads_by_subject(&self, account_id: &AccountId, normalized_subject: &str) -> Result<Vec<Thread>, SyncError>;
}

#[async_trait]
pub trait KeychainManager: Send + Sync {
    async fn get_secret(&self, service: &str, key: &str) -> Result<Option<String>, CredentialError>;
    async fn set_secret(&self, service: &str, key: &str, value: &str) -> Result<(), CredentialError>;
    async fn delete_secret(&self, service: &str, key: &str) -> Result<(), CredentialError>;
}

#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn lookup_by_tag(&self, tag: &str) -> Option<ProviderConfig>;
    async fn lookup_by_domain(&self, domain: &str) -> Option<ProviderConfig>;
}

/// A message ready for MIME encoding: the §4.9 send-reconciliation path
/// builds one of these from the same `OutgoingMessage` it hands to
/// `SMTPClient`, so the bytes APPENDed to Sent carry the same headers and
/// bodies that were actually transmitted rather than a lossy re-derivation.
pub struct MimeCompose<'a> {
    pub from: &'a str,
    pub to: &'a [String],
    pub cc: &'a [String],
    pub bcc: &'a [String],
    pub subject: &'a str,
    pub plain_body: &'a str,
    pub html_body: Option<&'a str>,
}

/// Encodes MIME bodies for compose and the Sent-folder APPEND copy.
/// Non-async: wraps `mail-builder`'s synchronous builder API, matching the
/// donor's `ComposeEmail::reply_to`/`reply_all`/`forward` helpers (which are
/// also plain synchronous string/struct transforms in `mail/types.rs`).
pub trait MIMEEncoder: Send + Sync {
    fn encode(&self, message: &MimeCompose<'_>) -> Result<Vec<u8>, MimeError>;
}
