//! §4.9 identity resolution: decides the stable `identity_key` an incoming
//! header should be stored/deduplicated under.
//!
//! No donor counterpart — the donor never deduplicates across folders at
//! all (`mail/imap/client.rs` treats every `(folder, uid)` as a distinct
//! preview row). Written against `EmailRepository` per the spec's four-step
//! rule.

use chrono::{DateTime, Utc};

use crate::domain::AccountId;
use crate::error::SyncError;
use crate::imap::FetchedHeader;
use crate::repository::EmailRepository;

use super::subject::normalize_subject;

const DATE_MATCH_WINDOW: chrono::Duration = chrono::Duration::days(3);

pub struct IdentityResolution {
    pub identity_key: String,
    /// The `Message-ID` to store on the upserted `Email`: the header's own
    /// raw id, an existing match's id, or `None` for a fully synthesized key.
    pub message_id: Option<String>,
}

/// `lower(from) | normalized_subject | floor(date/86400) | size_bytes`.
pub fn canonical_key(from: &str, subject: &str, date: DateTime<Utc>, size_bytes: u64) -> String {
    let day = date.timestamp() / 86_400;
    format!("{}|{}|{}|{}", from.trim().to_lowercase(), normalize_subject(subject), day, size_bytes)
}

pub async fn resolve_identity(
    repo: &dyn EmailRepository,
    account_id: &AccountId,
    header: &FetchedHeader,
) -> Result<IdentityResolution, SyncError> {
    let raw_message_id = header.message_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let canonical = canonical_key(&header.from, &header.subject, header.date, header.size_bytes);

    if let Some(raw) = raw_message_id {
        if let Some(existing) = repo.find_by_message_id(account_id, raw).await? {
            if headers_match(header, &existing.subject, &existing.from, existing.date_received) {
                return Ok(IdentityResolution {
                    identity_key: existing.identity_key,
                    message_id: existing.message_id.or_else(|| Some(raw.to_string())),
                });
            }
            return Ok(IdentityResolution { identity_key: format!("{raw}|{canonical}"), message_id: Some(raw.to_string()) });
        }

        if let Some(existing) = repo.find_by_identity_key(account_id, &canonical).await? {
            return Ok(IdentityResolution { identity_key: existing.identity_key, message_id: existing.message_id });
        }

        return Ok(IdentityResolution { identity_key: raw.to_string(), message_id: Some(raw.to_string()) });
    }

    if let Some(existing) = repo.find_by_identity_key(account_id, &canonical).await? {
        return Ok(IdentityResolution { identity_key: existing.identity_key, message_id: existing.message_id });
    }

    Ok(IdentityResolution { identity_key: format!("<canon-{canonical}@{account_id}>"), message_id: None })
}

fn headers_match(header: &FetchedHeader, existing_subject: &str, existing_from: &str, existing_date: DateTime<Utc>) -> bool {
    let subject_matches = normalize_subject(&header.subject) == normalize_subject(existing_subject);
    let from_matches = header.from.trim().to_lowercase() == existing_from.trim().to_lowercase();
    let date_matches = (header.date - existing_date).abs() <= DATE_MATCH_WINDOW;
    subject_matches && from_matches && date_matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Email, EmailFlags, EmailId, SendState, ThreadId};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;

    struct FakeRepo {
        by_message_id: StdMutex<Vec<Email>>,
        by_identity_key: StdMutex<Vec<Email>>,
    }

    impl FakeRepo {
        fn empty() -> Self {
            Self { by_message_id: StdMutex::new(Vec::new()), by_identity_key: StdMutex::new(Vec::new()) }
        }
        fn with(emails: Vec<Email>) -> Self {
            Self { by_message_id: StdMutex::new(emails.clone()), by_identity_key: StdMutex::new(emails) }
        }
    }

    #[async_trait]
    impl EmailRepository for FakeRepo {
        async fn find_by_identity_key(&self, account_id: &AccountId, identity_key: &str) -> Result<Option<Email>, SyncError> {
            Ok(self
                .by_identity_key
                .lock()
                .unwrap()
                .iter()
                .find(|e| &e.account_id == account_id && e.identity_key == identity_key)
                .cloned())
        }
        async fn find_by_message_id(&self, account_id: &AccountId, message_id: &str) -> Result<Option<Email>, SyncError> {
            Ok(self
                .by_message_id
                .lock()
                .unwrap()
                .iter()
                .find(|e| &e.account_id == account_id && e.message_id.as_deref() == Some(message_id))
                .cloned())
        }
        async fn known_uids(&self, _folder_id: &crate::domain::FolderId) -> Result<std::collections::HashSet<u32>, SyncError> {
            Ok(Default::default())
        }
        async fn upsert_email(&self, _email: &Email) -> Result<(), SyncError> {
            Ok(())
        }
        async fn link_to_folder(&self, _membership: &crate::domain::EmailFolder) -> Result<(), SyncError> {
            Ok(())
        }
        async fn unlink_from_folder(&self, _email_id: &EmailId, _folder_id: &crate::domain::FolderId) -> Result<(), SyncError> {
            Ok(())
        }
        async fn save_attachment(&self, _attachment: &crate::domain::Attachment) -> Result<(), SyncError> {
            Ok(())
        }
        async fn get_thread(&self, _thread_id: &ThreadId) -> Result<Option<crate::domain::Thread>, SyncError> {
            Ok(None)
        }
        async fn upsert_thread(&self, _thread: &crate::domain::Thread) -> Result<(), SyncError> {
            Ok(())
        }
        async fn find_threads_by_subject(&self, _account_id: &AccountId, _normalized_subject: &str) -> Result<Vec<crate::domain::Thread>, SyncError> {
            Ok(Vec::new())
        }
    }

    fn header(message_id: Option<&str>, from: &str, subject: &str, date: DateTime<Utc>, size_bytes: u64) -> FetchedHeader {
        FetchedHeader {
            uid: 1,
            message_id: message_id.map(str::to_string),
            in_reply_to: None,
            references: Vec::new(),
            from: from.to_string(),
            to: Vec::new(),
            cc: Vec::new(),
            subject: subject.to_string(),
            date,
            flags: EmailFlags::empty(),
            size_bytes,
            authentication_results: None,
        }
    }

    fn stored_email(account_id: &AccountId, message_id: &str, identity_key: &str, subject: &str, from: &str, date: DateTime<Utc>) -> Email {
        Email {
            id: EmailId("x".into()),
            account_id: account_id.clone(),
            identity_key: identity_key.to_string(),
            message_id: Some(message_id.to_string()),
            in_reply_to: None,
            references: Vec::new(),
            from: from.to_string(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.to_string(),
            plain_body: None,
            html_body: None,
            snippet: None,
            date_received: date,
            flags: EmailFlags::empty(),
            thread_id: ThreadId::new(),
            category: "uncategorized".into(),
            size_bytes: 100,
            authentication_results: None,
            send_state: SendState::None,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn no_message_id_and_no_match_synthesizes_canon_key() {
        let repo = FakeRepo::empty();
        let account_id = AccountId::from("acct-1");
        let date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let header = header(None, "Alice@Example.com", "Hi there", date, 1234);
        let resolution = resolve_identity(&repo, &account_id, &header).await.unwrap();
        assert!(resolution.identity_key.starts_with("<canon-alice@example.com|hi there|"));
        assert!(resolution.message_id.is_none());
    }

    #[tokio::test]
    async fn matching_raw_message_id_reuses_existing_identity() {
        let account_id = AccountId::from("acct-1");
        let date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let existing = stored_email(&account_id, "<msg-1@x>", "<msg-1@x>", "Hi there", "alice@example.com", date);
        let repo = FakeRepo::with(vec![existing]);
        let header = header(Some("<msg-1@x>"), "alice@example.com", "Re: Hi there", date, 1234);
        let resolution = resolve_identity(&repo, &account_id, &header).await.unwrap();
        assert_eq!(resolution.identity_key, "<msg-1@x>");
    }

    #[tokio::test]
    async fn raw_message_id_conflicting_with_existing_gets_combined_key() {
        let account_id = AccountId::from("acct-1");
        let old_date = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let new_date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let existing = stored_email(&account_id, "<reused@x>", "<reused@x>", "Totally different subject", "bob@example.com", old_date);
        let repo = FakeRepo::with(vec![existing]);
        let header = header(Some("<reused@x>"), "alice@example.com", "Hi there", new_date, 1234);
        let resolution = resolve_identity(&repo, &account_id, &header).await.unwrap();
        assert_eq!(resolution.identity_key, format!("<reused@x>|{}", canonical_key("alice@example.com", "Hi there", new_date, 1234)));
    }

    #[tokio::test]
    async fn raw_message_id_not_found_anywhere_is_used_directly() {
        let repo = FakeRepo::empty();
        let account_id = AccountId::from("acct-1");
        let date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let header = header(Some("<fresh@x>"), "alice@example.com", "Hi there", date, 1234);
        let resolution = resolve_identity(&repo, &account_id, &header).await.unwrap();
        assert_eq!(resolution.identity_key, "<fresh@x>");
        assert_eq!(resolution.message_id.as_deref(), Some("<fresh@x>"));
    }
}
