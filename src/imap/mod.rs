//! IMAP subsystem: C2 (`IMAPSession`), C4 (`IMAPClient`), C5
//! (`ConnectionPool`) and C10 (`IDLEMonitor`).
//!
//! Grounded on the donor's `mail/imap/{mod,client,pool,monitor}.rs`, with the
//! donor's `async_native_tls` swap for the new `crate::tls::TlsConnection`
//! (see `tls.rs`'s module doc comment) and its UI-actor-message plumbing
//! (`ImapCommand`/`ImapEvent`) replaced by plain async methods returning
//! `crate::error::ImapProtocolError`.

mod client;
mod idle;
mod pool;
mod sasl;
mod session;

pub use client::{CredentialTemplate, FetchedBody, FetchedHeader, FolderListEntry, IMAPClient};
pub use idle::{subscribe as subscribe_idle, IdleEvent, IdleMonitorEvent, IdleSubscription, IDLEMonitor};
pub use pool::{ConnectionPool, PooledImapClient};
pub use sasl::{sanitize_atom, sanitize_quoted, xoauth2_sasl_string, XOAuth2Authenticator};
pub use session::{IMAPSession, ImapSessionState, SessionCredential};
