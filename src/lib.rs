//! mailsync-core: a provider-agnostic IMAP/SMTP synchronization core.
//!
//! See `DESIGN.md` for the grounding ledger and open-question decisions.

pub mod config;
pub mod credentials;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod imap;
pub mod logging;
pub mod mime;
pub mod repository;
pub mod retry;
pub mod smtp;
pub mod sync;
pub mod tls;
