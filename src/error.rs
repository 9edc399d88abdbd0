//! Error taxonomy for the mail synchronization core.
//!
//! Each subsystem owns a focused error enum; [`MailCoreError`] composes them
//! via `#[from]` so callers crossing module boundaries can propagate with `?`
//! without manual mapping.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("operation timed out")]
    Timeout,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("operation cancelled")]
    Cancelled,
    #[error("TLS upgrade failed: {0}")]
    TlsUpgradeFailed(String),
    #[error("certificate validation failed: {0}")]
    CertificateValidationFailed(String),
}

#[derive(Debug, Error)]
pub enum ImapProtocolError {
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("STARTTLS not supported by server")]
    StarttlsNotSupported,
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to parse message: {0}")]
    ParsingFailed(String),
    #[error("folder not found: {0}")]
    FolderNotFound(String),
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("maximum retries exhausted")]
    MaxRetriesExhausted,
    #[error("operation cancelled")]
    OperationCancelled,
}

#[derive(Debug, Error)]
pub enum SmtpProtocolError {
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("STARTTLS not supported by server")]
    StarttlsNotSupported,
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("server rejected command: {0}")]
    CommandFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Imap(#[from] ImapProtocolError),
    #[error("checkout timed out waiting for a connection")]
    Timeout,
    #[error("pool shut down")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid domain: {0}")]
    InvalidDomain(String),
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("failed to parse autoconfig XML: {0}")]
    Xml(String),
    #[error("DNS lookup failed: {0}")]
    Dns(String),
    #[error("no configuration could be discovered for {0}")]
    NotFound(String),
    #[error("discovery budget exhausted")]
    BudgetExhausted,
    #[error("heuristic probe failed: {0}")]
    ProbeFailed(String),
}

#[derive(Debug, Error)]
pub enum MimeError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("encoding failed: {0}")]
    EncodingFailed(String),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credentials available for account")]
    NoCredentials,
    #[error("OAuth token expired")]
    TokenExpired,
    #[error("OAuth token refresh failed: {0}")]
    TokenRefreshFailed(String),
    #[error("keychain error: {0}")]
    Keychain(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Imap(#[from] ImapProtocolError),
    #[error(transparent)]
    Smtp(#[from] SmtpProtocolError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Mime(#[from] MimeError),
    #[error("repository error: {0}")]
    Repository(String),
    #[error("operation cancelled")]
    OperationCancelled,
}

/// Top-level error uniting every subsystem error. Module-internal code
/// generally returns its own narrower error type; this exists for call
/// sites that cross subsystem boundaries (e.g. the sync engine driving
/// the pool, credential resolver, and repository in the same `?` chain).
#[derive(Debug, Error)]
pub enum MailCoreError {
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error(transparent)]
    Imap(#[from] ImapProtocolError),
    #[error(transparent)]
    Smtp(#[from] SmtpProtocolError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type Result<T, E = MailCoreError> = std::result::Result<T, E>;
