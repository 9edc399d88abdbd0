//! §4.9 thread resolution: decides which `ThreadId` an incoming header
//! belongs to.
//!
//! The donor's `mail/thread.rs` builds a one-shot union-find grouping over
//! an entire in-memory email set; this resolves a single incoming header
//! incrementally against the repository instead, reusing only its
//! [`normalize_subject`](super::subject::normalize_subject) helper.

use chrono::Duration as ChronoDuration;

use crate::domain::{AccountId, ThreadId};
use crate::error::SyncError;
use crate::imap::FetchedHeader;
use crate::repository::EmailRepository;

use super::subject::normalize_subject;

const SUBJECT_FALLBACK_WINDOW: ChronoDuration = ChronoDuration::days(30);

pub async fn resolve_thread(
    repo: &dyn EmailRepository,
    account_id: &AccountId,
    header: &FetchedHeader,
) -> Result<ThreadId, SyncError> {
    if let Some(in_reply_to) = header.in_reply_to.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(parent) = repo.find_by_message_id(account_id, in_reply_to).await? {
            return Ok(parent.thread_id);
        }
    }

    for reference in header.references.iter().rev() {
        let reference = reference.trim();
        if reference.is_empty() {
            continue;
        }
        if let Some(parent) = repo.find_by_message_id(account_id, reference).await? {
            return Ok(parent.thread_id);
        }
    }

    let normalized = normalize_subject(&header.subject);
    if !normalized.is_empty() {
        let cutoff = header.date - SUBJECT_FALLBACK_WINDOW;
        let candidates = repo.find_threads_by_subject(account_id, &normalized).await?;
        if let Some(thread) = candidates.into_iter().filter(|t| t.latest_date >= cutoff).max_by_key(|t| t.latest_date) {
            return Ok(thread.id);
        }
    }

    Ok(ThreadId::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Email, EmailFlags, EmailId, SendState, Thread};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex as StdMutex;

    struct FakeRepo {
        by_message_id: StdMutex<Vec<Email>>,
        threads_by_subject: StdMutex<Vec<Thread>>,
    }

    impl FakeRepo {
        fn new(emails: Vec<Email>, threads: Vec<Thread>) -> Self {
            Self { by_message_id: StdMutex::new(emails), threads_by_subject: StdMutex::new(threads) }
        }
    }

    #[async_trait]
    impl EmailRepository for FakeRepo {
        async fn find_by_identity_key(&self, _account_id: &AccountId, _identity_key: &str) -> Result<Option<Email>, SyncError> {
            Ok(None)
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
        async fn get_thread(&self, _thread_id: &ThreadId) -> Result<Option<Thread>, SyncError> {
            Ok(None)
        }
        async fn upsert_thread(&self, _thread: &Thread) -> Result<(), SyncError> {
            Ok(())
        }
        async fn find_threads_by_subject(&self, account_id: &AccountId, normalized_subject: &str) -> Result<Vec<Thread>, SyncError> {
            Ok(self
                .threads_by_subject
                .lock()
                .unwrap()
                .iter()
                .filter(|t| &t.account_id == account_id && normalize_subject(&t.subject) == normalized_subject)
                .cloned()
                .collect())
        }
    }

    fn header(in_reply_to: Option<&str>, references: Vec<&str>, subject: &str, date: chrono::DateTime<Utc>) -> FetchedHeader {
        FetchedHeader {
            uid: 1,
            message_id: None,
            in_reply_to: in_reply_to.map(str::to_string),
            references: references.into_iter().map(str::to_string).collect(),
            from: "alice@example.com".into(),
            to: Vec::new(),
            cc: Vec::new(),
            subject: subject.to_string(),
            date,
            flags: EmailFlags::empty(),
            size_bytes: 100,
            authentication_results: None,
        }
    }

    fn email_with_thread(account_id: &AccountId, message_id: &str, thread_id: &ThreadId) -> Email {
        Email {
            id: EmailId("x".into()),
            account_id: account_id.clone(),
            identity_key: message_id.to_string(),
            message_id: Some(message_id.to_string()),
            in_reply_to: None,
            references: Vec::new(),
            from: "bob@example.com".into(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: "original".into(),
            plain_body: None,
            html_body: None,
            snippet: None,
            date_received: Utc::now(),
            flags: EmailFlags::empty(),
            thread_id: thread_id.clone(),
            category: "uncategorized".into(),
            size_bytes: 100,
            authentication_results: None,
            send_state: SendState::None,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn in_reply_to_hit_wins_over_references() {
        let account_id = AccountId::from("acct-1");
        let wanted_thread = ThreadId::new();
        let wrong_thread = ThreadId::new();
        let repo = FakeRepo::new(
            vec![
                email_with_thread(&account_id, "<parent@x>", &wanted_thread),
                email_with_thread(&account_id, "<grandparent@x>", &wrong_thread),
            ],
            Vec::new(),
        );
        let header = header(Some("<parent@x>"), vec!["<grandparent@x>"], "Re: hi", Utc::now());
        let thread_id = resolve_thread(&repo, &account_id, &header).await.unwrap();
        assert_eq!(thread_id, wanted_thread);
    }

    #[tokio::test]
    async fn references_scanned_newest_first() {
        let account_id = AccountId::from("acct-1");
        let newest_thread = ThreadId::new();
        let repo = FakeRepo::new(vec![email_with_thread(&account_id, "<newest@x>", &newest_thread)], Vec::new());
        let header = header(None, vec!["<oldest@x>", "<newest@x>"], "Re: hi", Utc::now());
        let thread_id = resolve_thread(&repo, &account_id, &header).await.unwrap();
        assert_eq!(thread_id, newest_thread);
    }

    #[tokio::test]
    async fn falls_back_to_subject_within_window() {
        let account_id = AccountId::from("acct-1");
        let thread_id_expected = ThreadId::new();
        let thread = Thread {
            id: thread_id_expected.clone(),
            account_id: account_id.clone(),
            subject: "Project status".into(),
            latest_date: Utc::now() - ChronoDuration::days(2),
            message_count: 1,
            unread_count: 0,
            starred: false,
            participants: Vec::new(),
            snippet: None,
            ai_category: None,
        };
        let repo = FakeRepo::new(Vec::new(), vec![thread]);
        let header = header(None, vec![], "Re: Project status", Utc::now());
        let thread_id = resolve_thread(&repo, &account_id, &header).await.unwrap();
        assert_eq!(thread_id, thread_id_expected);
    }

    #[tokio::test]
    async fn subject_outside_window_mints_new_thread() {
        let account_id = AccountId::from("acct-1");
        let thread = Thread {
            id: ThreadId::new(),
            account_id: account_id.clone(),
            subject: "Project status".into(),
            latest_date: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            message_count: 1,
            unread_count: 0,
            starred: false,
            participants: Vec::new(),
            snippet: None,
            ai_category: None,
        };
        let repo = FakeRepo::new(Vec::new(), vec![thread]);
        let header = header(None, vec![], "Re: Project status", Utc::now());
        let thread_id = resolve_thread(&repo, &account_id, &header).await.unwrap();
        assert!(!thread_id.0.is_empty());
    }
}
