//! §4.9 `InitialFast` staged sync: render the inbox within a handful of
//! round trips, then widen out to the rest of the account under a fixed
//! header budget, then hand off to an unbounded background catch-up loop.
//!
//! No donor counterpart -- the donor fetches one folder's full history in
//! one shot (`mail/imap/actor.rs::sync_folder_internal`). This stages that
//! same per-folder primitive (`message_sync::sync_folder_messages`) across
//! an account so the UI never blocks on a slow, large mailbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{AccountConfig, Tunables};
use crate::domain::{AccountId, CatchUpStatus, Folder, FolderType};
use crate::error::SyncError;
use crate::imap::IMAPClient;
use crate::repository::{AccountRepository, EmailRepository};

use super::folder_list::{upsert_candidate, ProviderHint};
use super::message_sync::{sync_folder_messages, MessageSyncMode, MessageSyncOutcome};
use crate::domain::ProviderConfig;
use crate::imap::FolderListEntry;

pub struct InitialFastOutcome {
    pub inbox_emails: Vec<crate::domain::EmailId>,
    pub total_fetched: usize,
}

/// Stage A: one `LIST "" "*"`, upserted against existing folders.
pub async fn stage_a_list_folders(
    client: &mut IMAPClient,
    account_repo: &dyn AccountRepository,
    account_id: &AccountId,
    provider: &ProviderConfig,
) -> Result<Vec<(Folder, bool)>, SyncError> {
    let entries: Vec<FolderListEntry> = client.list_folders().await?;
    let existing = account_repo.list_folders(account_id).await?;

    let hint = ProviderHint { archive_behavior: provider.archive_behavior, tag: &provider.tag };
    let mut results = Vec::with_capacity(entries.len());
    for entry in &entries {
        let prior = existing.iter().find(|f| f.imap_path == entry.imap_path);
        let (folder, syncable) = upsert_candidate(account_id, entry, prior, &hint);
        account_repo.upsert_folder(&folder).await?;
        results.push((folder, syncable));
    }
    Ok(results)
}

/// Stage B: Inbox, headers-only, forward, capped at
/// `Tunables::initial_fast_inbox_cap` (default 30). Marks
/// `initial_fast_completed` so Stage C knows the first 30 are already done.
pub async fn stage_b_inbox_fast(
    client: &mut IMAPClient,
    account_repo: &dyn AccountRepository,
    email_repo: &dyn EmailRepository,
    account_id: &AccountId,
    inbox: &mut Folder,
    tunables: &Tunables,
) -> Result<MessageSyncOutcome, SyncError> {
    let outcome = sync_folder_messages(
        client,
        account_repo,
        email_repo,
        account_id,
        inbox,
        MessageSyncMode::Forward,
        false,
        tunables.fetch_batch_size,
        Some(tunables.initial_fast_inbox_cap),
    )
    .await?;
    inbox.initial_fast_completed = true;
    account_repo.upsert_folder(inbox).await?;
    Ok(outcome)
}

/// Stage C: the 60/20/20 budget allocator. `folders` excludes the inbox
/// (already handled by Stage B) and is pre-filtered to `should_sync`.
pub async fn stage_c_budget_allocate(
    client: &mut IMAPClient,
    account_repo: &dyn AccountRepository,
    email_repo: &dyn EmailRepository,
    account_id: &AccountId,
    inbox: &mut Folder,
    sent: Option<&mut Folder>,
    other_folders: &mut [Folder],
    tunables: &Tunables,
) -> Result<usize, SyncError> {
    let mut total_fetched = 0usize;

    let inbox_cap = tunables.stage_c_inbox_backward_cap();
    let outcome = sync_folder_messages(
        client,
        account_repo,
        email_repo,
        account_id,
        inbox,
        MessageSyncMode::Backward,
        false,
        tunables.fetch_batch_size,
        Some(inbox_cap),
    )
    .await?;
    total_fetched += outcome.fetched;

    if let Some(sent) = sent {
        let sent_cap = tunables.stage_c_sent_forward_cap();
        let outcome = sync_folder_messages(
            client,
            account_repo,
            email_repo,
            account_id,
            sent,
            MessageSyncMode::Forward,
            false,
            tunables.fetch_batch_size,
            Some(sent_cap),
        )
        .await?;
        total_fetched += outcome.fetched;
    }

    if !other_folders.is_empty() {
        let per_folder_caps = split_other_folder_budget(other_folders.len(), tunables);
        for (folder, cap) in other_folders.iter_mut().zip(per_folder_caps) {
            let outcome = sync_folder_messages(
                client,
                account_repo,
                email_repo,
                account_id,
                folder,
                MessageSyncMode::Forward,
                false,
                tunables.fetch_batch_size,
                Some(cap),
            )
            .await?;
            total_fetched += outcome.fetched;
        }
    }

    Ok(total_fetched)
}

/// Splits `stage_c_other_folders_cap()` across `n` folders, each getting at
/// least `stage_c_other_folder_floor`; if the even floor can't be satisfied
/// within the cap, the cap is distributed evenly instead and any remainder
/// handed out round-robin starting from the first folder.
fn split_other_folder_budget(n: usize, tunables: &Tunables) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let total = tunables.stage_c_other_folders_cap();
    let floor = tunables.stage_c_other_folder_floor;

    if floor * n <= total {
        let mut caps = vec![floor; n];
        let mut remainder = total - floor * n;
        let mut i = 0;
        while remainder > 0 {
            caps[i % n] += 1;
            remainder -= 1;
            i += 1;
        }
        caps
    } else {
        let even = total / n;
        let mut caps = vec![even; n];
        let mut remainder = total % n;
        let mut i = 0;
        while remainder > 0 {
            caps[i % n] += 1;
            remainder -= 1;
            i += 1;
        }
        caps
    }
}

/// A cancellable, pausable handle to a Stage D background catch-up task.
/// Pausing is resumable (`pause_catch_up`/`resume_catch_up`); cancellation
/// is not (account removal / shutdown).
#[derive(Clone, Default)]
pub struct CatchUpHandle {
    cancelled: CancellationToken,
    paused: Arc<AtomicBool>,
}

impl CatchUpHandle {
    pub fn new() -> Self {
        Self { cancelled: CancellationToken::new(), paused: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.cancelled.cancel();
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Stage D: cycles folders in priority order (inbox, sent, others) pulling
/// `max_uids = fetch_batch_size` per folder per pass via `CatchUp`
/// (backward) mode, until a full pass yields nothing new, the handle is
/// cancelled, or a folder comes back `Paused` (skipped that pass, not
/// treated as a terminal condition -- the loop keeps cycling in case it's
/// resumed). Per-folder errors are logged and swallowed; the loop moves on
/// to the next folder rather than aborting the whole account.
pub async fn run_catch_up_loop(
    client: &mut IMAPClient,
    account_repo: &dyn AccountRepository,
    email_repo: &dyn EmailRepository,
    account: &AccountConfig,
    handle: &CatchUpHandle,
    tunables: &Tunables,
) {
    let account_id = AccountId::from(account.account_id.clone());

    loop {
        if handle.is_cancelled() {
            tracing::info!(account = %account.account_id, "catch-up loop cancelled");
            return;
        }

        if handle.is_paused() {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            continue;
        }

        let folders = match account_repo.list_folders(&account_id).await {
            Ok(folders) => folders,
            Err(error) => {
                tracing::warn!(account = %account.account_id, %error, "catch-up: failed to list folders, retrying next pass");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }
        };

        let mut ordered: Vec<Folder> = folders.into_iter().filter(|f| f.initial_fast_completed).collect();
        ordered.sort_by_key(|f| folder_priority(f.folder_type));

        let mut any_new_this_pass = false;

        for mut folder in ordered {
            if handle.is_cancelled() {
                return;
            }
            if folder.catch_up_status == CatchUpStatus::Paused {
                continue;
            }

            folder.catch_up_status = CatchUpStatus::Running;
            if let Err(error) = account_repo.upsert_folder(&folder).await {
                tracing::warn!(folder = %folder.imap_path, %error, "catch-up: failed to mark folder running");
                continue;
            }

            match sync_folder_messages(
                client,
                account_repo,
                email_repo,
                &account_id,
                &mut folder,
                MessageSyncMode::Backward,
                false,
                tunables.fetch_batch_size,
                Some(tunables.fetch_batch_size),
            )
            .await
            {
                Ok(outcome) => {
                    if outcome.fetched > 0 {
                        any_new_this_pass = true;
                    }
                    folder.catch_up_status =
                        if folder.backfill_cursor_uid == Some(0) || outcome.fetched == 0 { CatchUpStatus::Completed } else { CatchUpStatus::Idle };
                }
                Err(error) => {
                    tracing::warn!(folder = %folder.imap_path, %error, "catch-up: folder sync failed, continuing with next folder");
                    folder.catch_up_status = CatchUpStatus::Error;
                }
            }
            let _ = account_repo.upsert_folder(&folder).await;
        }

        if !any_new_this_pass {
            tracing::info!(account = %account.account_id, "catch-up loop converged, exiting");
            return;
        }
    }
}

fn folder_priority(folder_type: FolderType) -> u8 {
    match folder_type {
        FolderType::Inbox => 0,
        FolderType::Sent => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunables() -> Tunables {
        Tunables::default()
    }

    #[test]
    fn split_with_floor_satisfiable_gives_each_folder_the_floor_plus_remainder() {
        let caps = split_other_folder_budget(3, &tunables());
        assert_eq!(caps.iter().sum::<usize>(), tunables().stage_c_other_folders_cap());
        assert!(caps.iter().all(|&c| c >= tunables().stage_c_other_folder_floor));
    }

    #[test]
    fn split_with_floor_unsatisfiable_falls_back_to_even_distribution() {
        let t = Tunables::default();
        let n = (t.stage_c_other_folders_cap() / t.stage_c_other_folder_floor) + 5;
        let caps = split_other_folder_budget(n, &t);
        assert_eq!(caps.iter().sum::<usize>(), t.stage_c_other_folders_cap());
    }

    #[test]
    fn zero_folders_yields_empty_split() {
        assert!(split_other_folder_budget(0, &tunables()).is_empty());
    }

    #[test]
    fn catch_up_handle_starts_neither_cancelled_nor_paused() {
        let handle = CatchUpHandle::new();
        assert!(!handle.is_cancelled());
        assert!(!handle.is_paused());
    }

    #[test]
    fn pause_then_resume_round_trips() {
        let handle = CatchUpHandle::new();
        handle.pause();
        assert!(handle.is_paused());
        handle.resume();
        assert!(!handle.is_paused());
    }

    #[test]
    fn folder_priority_orders_inbox_before_sent_before_others() {
        assert!(folder_priority(FolderType::Inbox) < folder_priority(FolderType::Sent));
        assert!(folder_priority(FolderType::Sent) < folder_priority(FolderType::Custom));
    }
}
