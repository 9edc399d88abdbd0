//! SMTP subsystem: C3 (`SMTPSession`, via `lettre`'s transport) and the
//! SMTP half of C4 (`SMTPClient`: connect/authenticate/send).
//!
//! Grounded on the donor's `mail/smtp.rs`, which already builds on
//! `lettre::AsyncSmtpTransport<Tokio1Executor>`; `lettre` owns the wire
//! framing (dot-stuffing, STARTTLS upgrade, DATA terminator) so there's no
//! hand-rolled session state machine here the way there is for IMAP.

mod client;

pub use client::{OutgoingMessage, SMTPClient};
