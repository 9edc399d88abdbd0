//! §4.9 write-side IMAP reconciliation: flag changes, moves, and
//! provider-aware archiving. Invoked by action use cases after a local
//! mutation; optimistic (failures are logged by the caller, not rolled
//! back -- the next sync pass reconciles any drift).
//!
//! Grounded on the donor's Gmail-flavored `\Deleted`+`EXPUNGE` move pattern
//! already present in `mail/imap/client.rs`'s delete path, generalized to
//! cover both a plain folder move and the two `ArchiveBehavior` variants.

use crate::config::ArchiveBehavior;
use crate::domain::EmailFlags;
use crate::error::SyncError;
use crate::imap::IMAPClient;

/// A batch of uids to mutate, already grouped by (account, source folder)
/// by the caller.
pub struct FlagChange<'a> {
    pub source_folder: &'a str,
    pub uids: &'a [u32],
    pub add: EmailFlags,
    pub remove: EmailFlags,
}

pub async fn apply_flag_change(client: &mut IMAPClient, change: &FlagChange<'_>) -> Result<(), SyncError> {
    client.select_folder(change.source_folder).await?;
    for &uid in change.uids {
        client.store_flags(uid, change.add, change.remove).await?;
    }
    Ok(())
}

pub async fn move_messages(client: &mut IMAPClient, source_folder: &str, uids: &[u32], dest_folder: &str) -> Result<(), SyncError> {
    if uids.is_empty() {
        return Ok(());
    }
    client.select_folder(source_folder).await?;
    let sequence = uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
    client.copy_messages(&sequence, dest_folder).await?;
    for &uid in uids {
        client.store_flags(uid, EmailFlags::DELETED, EmailFlags::empty()).await?;
    }
    client.expunge_messages().await?;
    Ok(())
}

/// `label-remove-inbox` providers (Gmail): archiving just means dropping
/// the Inbox label, so this only ever touches the INBOX mailbox.
/// `copy-to-archive` providers: a real move into `archive_folder_path`.
pub async fn archive_messages(
    client: &mut IMAPClient,
    archive_behavior: ArchiveBehavior,
    uids: &[u32],
    archive_folder_path: Option<&str>,
) -> Result<(), SyncError> {
    if uids.is_empty() {
        return Ok(());
    }
    match archive_behavior {
        ArchiveBehavior::LabelRemoveInbox => {
            client.select_folder("INBOX").await?;
            for &uid in uids {
                client.store_flags(uid, EmailFlags::DELETED, EmailFlags::empty()).await?;
            }
            client.expunge_messages().await?;
            Ok(())
        }
        ArchiveBehavior::CopyToArchive => {
            let dest = archive_folder_path
                .ok_or_else(|| SyncError::Repository("no Archive folder mapped for this account".to_string()))?;
            move_messages(client, "INBOX", uids, dest).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_behavior_selects_inbox_path_for_label_providers() {
        assert!(matches!(ArchiveBehavior::LabelRemoveInbox, ArchiveBehavior::LabelRemoveInbox));
    }
}
