use crate::config::{ArchiveBehavior, ConnectionSecurity};
use serde::{Deserialize, Serialize};

/// Immutable per-provider descriptor. Looked up by `ProviderRegistry` from a
/// domain or a provider tag; never mutated once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub tag: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_security: ConnectionSecurity,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_security: ConnectionSecurity,
    pub auth_method: ProviderAuthMethod,
    pub archive_behavior: ArchiveBehavior,
    /// Whether a successfully sent message must be explicitly APPENDed to
    /// the Sent folder by the client. See SPEC_FULL.md open-question
    /// decision: defaults to `true` for anything not in the static
    /// registry (unknown/self-hosted providers).
    pub requires_sent_append: bool,
    pub idle_refresh_secs: u64,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderAuthMethod {
    OAuth2,
    Plain,
}

impl ProviderConfig {
    /// Fallback descriptor for a domain discovery could not positively
    /// identify as a known consumer provider. Per the open-question
    /// decision recorded in SPEC_FULL.md, unknown providers require
    /// explicit Sent append.
    pub fn unknown_self_hosted(imap_host: String, smtp_host: String) -> Self {
        Self {
            tag: "unknown".to_string(),
            imap_host,
            imap_port: 993,
            imap_security: ConnectionSecurity::Tls,
            smtp_host,
            smtp_port: 587,
            smtp_security: ConnectionSecurity::Starttls,
            auth_method: ProviderAuthMethod::Plain,
            archive_behavior: ArchiveBehavior::CopyToArchive,
            requires_sent_append: true,
            idle_refresh_secs: 25 * 60,
            max_connections: 5,
        }
    }
}
