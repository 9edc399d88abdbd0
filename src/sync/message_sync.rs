//! §4.9 per-folder message sync: UIDVALIDITY handling, candidate UID
//! determination, batched fetch, identity/thread resolution, and cursor
//! maintenance.
//!
//! Generalizes the donor's `mail/imap/actor.rs::sync_folder_internal`
//! (UIDVALIDITY check, full-vs-incremental fetch branching) from its
//! single-account always-full-fetch shape to the cursor-based
//! forward/backward/full modes below.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::domain::{AccountId, Email, EmailFlags, EmailFolder, EmailId, Folder, SendState, Thread, ThreadId};
use crate::error::SyncError;
use crate::imap::{FetchedBody, FetchedHeader, IMAPClient};
use crate::repository::{AccountRepository, EmailRepository};

use super::identity::resolve_identity;
use super::subject::normalize_subject;
use super::thread::resolve_thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSyncMode {
    /// `UID SEARCH ALL` (first sync) or `UID SEARCH SINCE <last_sync>`
    /// (subsequent), unbounded by cursors.
    Full,
    /// New mail beyond `forward_cursor_uid`.
    Forward,
    /// Older mail below `backfill_cursor_uid`, capped by `max_uids`.
    Backward,
}

#[derive(Debug, Default)]
pub struct MessageSyncOutcome {
    pub fetched: usize,
    pub new_email_ids: Vec<EmailId>,
}

/// Runs one candidate-determination + fetch + ingest pass over `folder`.
/// Mutates `folder` in place (uid_validity, cursors, counts) and persists it
/// via `account_repo` before returning. `fetch_bodies` selects headers-only
/// (non-inbox / incremental) vs full body fetch (inbox-first stages).
pub async fn sync_folder_messages(
    client: &mut IMAPClient,
    account_repo: &dyn AccountRepository,
    email_repo: &dyn EmailRepository,
    account_id: &AccountId,
    folder: &mut Folder,
    mode: MessageSyncMode,
    want_bodies: bool,
    batch_size: usize,
    max_uids: Option<usize>,
) -> Result<MessageSyncOutcome, SyncError> {
    let server_uid_validity = client.select_folder(&folder.imap_path).await?;

    if folder.uid_validity != 0 && folder.uid_validity != server_uid_validity {
        account_repo.delete_folder_memberships(&folder.id).await?;
        folder.invalidate_for_uid_validity_change(server_uid_validity);
    } else if folder.uid_validity == 0 {
        folder.uid_validity = server_uid_validity;
    }

    let all_uids = match mode {
        MessageSyncMode::Full if folder.last_sync_at.is_some() => {
            client.search_uids(&format!("SINCE {}", imap_date(folder.last_sync_at.unwrap()))).await?
        }
        _ => client.search_uids("ALL").await?,
    };

    let mut candidates: Vec<u32> = match mode {
        MessageSyncMode::Full => all_uids.clone(),
        MessageSyncMode::Forward => {
            let cursor = folder.forward_cursor_uid.unwrap_or(0);
            all_uids.iter().copied().filter(|uid| *uid > cursor).collect()
        }
        MessageSyncMode::Backward => {
            let cursor = folder.backfill_cursor_uid.unwrap_or(u32::MAX);
            let mut below: Vec<u32> = all_uids.iter().copied().filter(|uid| *uid < cursor).collect();
            below.sort_unstable_by(|a, b| b.cmp(a));
            below
        }
    };

    let known = email_repo.known_uids(&folder.id).await?;
    candidates.retain(|uid| !known.contains(uid));

    if let Some(max) = max_uids {
        candidates.truncate(max);
    }

    if candidates.is_empty() {
        advance_cursors_from_observed(folder, &all_uids);
        account_repo.upsert_folder(folder).await?;
        return Ok(MessageSyncOutcome::default());
    }

    let mut outcome = MessageSyncOutcome::default();
    let mut thread_deltas: HashMap<ThreadId, ThreadDelta> = HashMap::new();

    for batch in candidates.chunks(batch_size.max(1)) {
        let sequence = batch.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        let headers = client.fetch_headers(&sequence).await?;
        let bodies: HashMap<u32, FetchedBody> =
            if want_bodies { client.fetch_bodies(batch).await?.into_iter().collect() } else { HashMap::new() };

        for header in &headers {
            let email_id = ingest_header(
                email_repo,
                account_id,
                folder,
                header,
                bodies.get(&header.uid),
                &mut thread_deltas,
            )
            .await?;
            outcome.new_email_ids.push(email_id);
        }

        outcome.fetched += headers.len();
        folder.advance_cursors(batch);
        account_repo.upsert_folder(folder).await?;
    }

    apply_thread_deltas(email_repo, account_id, thread_deltas).await?;

    let total_count = client.search_uids("ALL").await?.len() as u64;
    let unread_count = client.search_uids("UNSEEN").await?.len() as u64;
    folder.total_count = total_count;
    folder.unread_count = unread_count;
    folder.last_sync_at = Some(Utc::now());
    account_repo.upsert_folder(folder).await?;

    Ok(outcome)
}

async fn ingest_header(
    email_repo: &dyn EmailRepository,
    account_id: &AccountId,
    folder: &Folder,
    header: &FetchedHeader,
    body: Option<&FetchedBody>,
    thread_deltas: &mut HashMap<ThreadId, ThreadDelta>,
) -> Result<EmailId, SyncError> {
    let identity = resolve_identity(email_repo, account_id, header).await?;
    let thread_id = resolve_thread(email_repo, account_id, header).await?;
    let is_new_thread = email_repo.get_thread(&thread_id).await?.is_none();

    let email_id = Email::derive_id(account_id, &identity.identity_key);
    let is_unseen = !header.flags.contains(EmailFlags::SEEN);
    let is_flagged = header.flags.contains(EmailFlags::FLAGGED);

    let email = Email {
        id: email_id.clone(),
        account_id: account_id.clone(),
        identity_key: identity.identity_key,
        message_id: identity.message_id,
        in_reply_to: header.in_reply_to.clone(),
        references: header.references.clone(),
        from: header.from.clone(),
        to: header.to.clone(),
        cc: header.cc.clone(),
        bcc: Vec::new(),
        subject: header.subject.clone(),
        plain_body: body.and_then(|b| b.plain.clone()),
        html_body: body.and_then(|b| b.html.clone()),
        snippet: body.and_then(|b| b.plain.as_ref().map(|p| snippet_of(p))),
        date_received: header.date,
        flags: header.flags,
        thread_id: thread_id.clone(),
        category: "uncategorized".to_string(),
        size_bytes: header.size_bytes,
        authentication_results: header.authentication_results.clone(),
        send_state: SendState::None,
        retry_count: 0,
    };

    email_repo.upsert_email(&email).await?;
    email_repo
        .link_to_folder(&EmailFolder { email_id: email_id.clone(), folder_id: folder.id.clone(), imap_uid: header.uid })
        .await?;

    if let Some(body) = body {
        for attachment in &body.attachments {
            let mut attachment = attachment.clone();
            attachment.email_id = email_id.clone();
            email_repo.save_attachment(&attachment).await?;
        }
    }

    let delta = thread_deltas.entry(thread_id).or_insert_with(|| ThreadDelta::new(is_new_thread, &email));
    delta.merge_header(header, is_unseen, is_flagged, &email);

    Ok(email_id)
}

/// Accumulated, to-be-merged change for one thread, spanning every header
/// ingested across every batch in this `sync_folder_messages` call. Applied
/// once at the end so a thread touched by several batches only round-trips
/// through the repository once.
struct ThreadDelta {
    is_new: bool,
    subject_of_oldest: String,
    oldest_date: DateTime<Utc>,
    newest_date: DateTime<Utc>,
    newest_snippet: Option<String>,
    message_delta: u64,
    unread_delta: u64,
    starred_any: bool,
    participants: Vec<String>,
}

impl ThreadDelta {
    fn new(is_new: bool, first_email: &Email) -> Self {
        Self {
            is_new,
            subject_of_oldest: first_email.subject.clone(),
            oldest_date: first_email.date_received,
            newest_date: first_email.date_received,
            newest_snippet: first_email.snippet.clone(),
            message_delta: 0,
            unread_delta: 0,
            starred_any: false,
            participants: Vec::new(),
        }
    }

    fn merge_header(&mut self, header: &FetchedHeader, is_unseen: bool, is_flagged: bool, email: &Email) {
        self.message_delta += 1;
        if is_unseen {
            self.unread_delta += 1;
        }
        self.starred_any = self.starred_any || is_flagged;
        if !self.participants.iter().any(|p| p.eq_ignore_ascii_case(&header.from)) {
            self.participants.push(header.from.clone());
        }
        if header.date < self.oldest_date {
            self.oldest_date = header.date;
            self.subject_of_oldest = header.subject.clone();
        }
        if header.date >= self.newest_date {
            self.newest_date = header.date;
            self.newest_snippet = email.snippet.clone();
        }
    }
}

async fn apply_thread_deltas(
    email_repo: &dyn EmailRepository,
    account_id: &AccountId,
    deltas: HashMap<ThreadId, ThreadDelta>,
) -> Result<(), SyncError> {
    for (thread_id, delta) in deltas {
        match email_repo.get_thread(&thread_id).await? {
            Some(mut thread) => {
                let snippet_from_delta = delta.newest_date >= thread.latest_date;
                thread.latest_date = thread.latest_date.max(delta.newest_date);
                thread.message_count += delta.message_delta;
                thread.unread_count += delta.unread_delta;
                thread.starred = thread.starred || delta.starred_any;
                if snippet_from_delta {
                    thread.snippet = delta.newest_snippet;
                }
                for participant in delta.participants {
                    if !thread.participants.iter().any(|p| p.eq_ignore_ascii_case(&participant)) {
                        thread.participants.push(participant);
                    }
                }
                email_repo.upsert_thread(&thread).await?;
            }
            None => {
                let subject = if delta.is_new { delta.subject_of_oldest.clone() } else { normalize_subject(&delta.subject_of_oldest) };
                let thread = Thread {
                    id: thread_id,
                    account_id: account_id.clone(),
                    subject,
                    latest_date: delta.newest_date,
                    message_count: delta.message_delta,
                    unread_count: delta.unread_delta,
                    starred: delta.starred_any,
                    participants: delta.participants,
                    snippet: delta.newest_snippet,
                    ai_category: None,
                };
                email_repo.upsert_thread(&thread).await?;
            }
        }
    }
    Ok(())
}

fn advance_cursors_from_observed(folder: &mut Folder, all_uids: &[u32]) {
    if !all_uids.is_empty() {
        folder.advance_cursors(all_uids);
    }
}

fn snippet_of(plain_body: &str) -> String {
    const SNIPPET_LEN: usize = 200;
    let collapsed: String = plain_body.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(SNIPPET_LEN).collect()
}

fn imap_date(date: DateTime<Utc>) -> String {
    date.format("%d-%b-%Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imap_date_formats_rfc3501_style() {
        use chrono::TimeZone;
        let date = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(imap_date(date), "07-Mar-2026");
    }

    #[test]
    fn snippet_collapses_whitespace_and_caps_length() {
        let body = "line one\n\nline   two\tline three";
        assert_eq!(snippet_of(body), "line one line two line three");
    }
}
