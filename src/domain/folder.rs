use crate::domain::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FolderId(pub String);

impl From<String> for FolderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderType {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Spam,
    Starred,
    Archive,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchUpStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    pub account_id: AccountId,
    pub name: String,
    pub imap_path: String,
    pub folder_type: FolderType,
    pub uid_validity: u32,
    pub total_count: u64,
    pub unread_count: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub forward_cursor_uid: Option<u32>,
    pub backfill_cursor_uid: Option<u32>,
    pub initial_fast_completed: bool,
    pub catch_up_status: CatchUpStatus,
}

impl Folder {
    pub fn new(account_id: AccountId, imap_path: String, name: String, folder_type: FolderType) -> Self {
        Self {
            id: FolderId(format!("{account_id}:{imap_path}")),
            account_id,
            imap_path,
            name,
            folder_type,
            uid_validity: 0,
            total_count: 0,
            unread_count: 0,
            last_sync_at: None,
            forward_cursor_uid: None,
            backfill_cursor_uid: None,
            initial_fast_completed: false,
            catch_up_status: CatchUpStatus::Idle,
        }
    }

    /// Invalidate cursors and fast-sync progress after a UIDVALIDITY change.
    /// Caller is responsible for deleting the folder's EmailFolder rows
    /// before any further FETCH, per the UIDVALIDITY-reset invariant.
    pub fn invalidate_for_uid_validity_change(&mut self, server_uid_validity: u32) {
        self.forward_cursor_uid = None;
        self.backfill_cursor_uid = None;
        self.initial_fast_completed = false;
        self.catch_up_status = CatchUpStatus::Idle;
        self.uid_validity = server_uid_validity;
    }

    pub fn advance_cursors(&mut self, batch_uids: &[u32]) {
        if let Some(&max_uid) = batch_uids.iter().max() {
            self.forward_cursor_uid = Some(self.forward_cursor_uid.map_or(max_uid, |c| c.max(max_uid)));
        }
        if let Some(&min_uid) = batch_uids.iter().min() {
            self.backfill_cursor_uid = Some(self.backfill_cursor_uid.map_or(min_uid, |c| c.min(min_uid)));
        }
    }
}
