//! §4.9 folder list sync: maps a single `LIST "" "*"` response into folder
//! type tags and a sync/no-sync decision, then upserts.
//!
//! Grounded on RFC 6154 SPECIAL-USE attributes surfaced by
//! `imap::client::FolderListEntry.attributes` plus the donor's hardcoded
//! Gmail folder-name matching in `mail/imap/client.rs::list_folders`
//! (donor special-cases `"[Gmail]/..."` path prefixes; this generalizes
//! that into the provider-aware table below).

use crate::config::ArchiveBehavior;
use crate::domain::{Folder, FolderType};
use crate::imap::FolderListEntry;

/// Only the slice of `ProviderConfig` this module actually consults,
/// borrowed rather than requiring the whole struct so tests don't need to
/// construct one.
pub struct ProviderHint<'a> {
    pub archive_behavior: ArchiveBehavior,
    pub tag: &'a str,
}

/// Maps SPECIAL-USE attributes and path conventions to a folder type.
pub fn folder_type(imap_path: &str, attributes: &[String], hint: &ProviderHint<'_>) -> FolderType {
    let lower_path = imap_path.to_lowercase();

    for attribute in attributes {
        match attribute.as_str() {
            "sent" => return FolderType::Sent,
            "drafts" => return FolderType::Drafts,
            "trash" => return FolderType::Trash,
            "junk" => return FolderType::Spam,
            "flagged" => return FolderType::Starred,
            "archive" => return FolderType::Archive,
            "all" if hint.tag == "gmail" => return FolderType::Archive,
            _ => {}
        }
    }

    if lower_path == "inbox" {
        return FolderType::Inbox;
    }
    if lower_path.ends_with("sent") || lower_path.ends_with("sent items") || lower_path.ends_with("sent mail") {
        return FolderType::Sent;
    }
    if lower_path.ends_with("drafts") {
        return FolderType::Drafts;
    }
    if lower_path.ends_with("trash") || lower_path.ends_with("deleted items") || lower_path.ends_with("bin") {
        return FolderType::Trash;
    }
    if lower_path.ends_with("junk") || lower_path.ends_with("spam") {
        return FolderType::Spam;
    }
    if lower_path.ends_with("archive") || lower_path.ends_with("all mail") {
        return FolderType::Archive;
    }

    FolderType::Custom
}

/// `false` for non-selectable (`\Noselect`) folders, virtual/duplicate
/// folders, and provider-specific skip rules (Gmail's All Mail when the
/// account archives by label rather than by moving into a real folder --
/// syncing it would double-count every archived message).
pub fn should_sync(entry: &FolderListEntry, folder_type: FolderType, hint: &ProviderHint<'_>) -> bool {
    if !entry.is_selectable {
        return false;
    }
    if entry.attributes.iter().any(|a| a == "nonexistent") {
        return false;
    }
    if folder_type == FolderType::Archive && hint.archive_behavior == ArchiveBehavior::LabelRemoveInbox {
        return false;
    }
    true
}

/// Applies `should_sync`/`folder_type` to one LIST response entry and
/// returns the `Folder` to upsert, paired with whether the caller should
/// also pull messages for it. Non-syncable folders are still upserted (per
/// §4.9) so action use cases can reference them, just never message-synced.
pub fn upsert_candidate(
    account_id: &crate::domain::AccountId,
    entry: &FolderListEntry,
    existing: Option<&Folder>,
    hint: &ProviderHint<'_>,
) -> (Folder, bool) {
    let folder_type = folder_type(&entry.imap_path, &entry.attributes, hint);
    let name = entry.imap_path.rsplit(entry.delimiter.as_deref().unwrap_or("/")).next().unwrap_or(&entry.imap_path).to_string();

    let mut folder = match existing {
        Some(folder) => folder.clone(),
        None => Folder::new(account_id.clone(), entry.imap_path.clone(), name.clone(), folder_type),
    };
    folder.name = name;
    folder.folder_type = folder_type;

    (folder, should_sync(entry, folder_type, hint))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(tag: &str, archive_behavior: ArchiveBehavior) -> ProviderHint<'_> {
        ProviderHint { archive_behavior, tag }
    }

    fn entry(path: &str, attributes: &[&str], selectable: bool) -> FolderListEntry {
        FolderListEntry {
            imap_path: path.to_string(),
            delimiter: Some("/".to_string()),
            is_selectable: selectable,
            attributes: attributes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn special_use_attribute_wins_over_path_heuristic() {
        let hint = hint("outlook", ArchiveBehavior::CopyToArchive);
        let ft = folder_type("Weird Name", &["sent".to_string()], &hint);
        assert_eq!(ft, FolderType::Sent);
    }

    #[test]
    fn path_convention_used_when_no_special_use_tag() {
        let hint = hint("unknown", ArchiveBehavior::CopyToArchive);
        let ft = folder_type("INBOX.Trash", &[], &hint);
        assert_eq!(ft, FolderType::Trash);
    }

    #[test]
    fn noselect_folder_is_never_synced() {
        let hint = hint("gmail", ArchiveBehavior::LabelRemoveInbox);
        let e = entry("[Gmail]", &["noselect"], false);
        assert!(!should_sync(&e, FolderType::Custom, &hint));
    }

    #[test]
    fn gmail_all_mail_is_skipped_when_archiving_by_label() {
        let hint = hint("gmail", ArchiveBehavior::LabelRemoveInbox);
        let e = entry("[Gmail]/All Mail", &["all"], true);
        let ft = folder_type(&e.imap_path, &e.attributes, &hint);
        assert_eq!(ft, FolderType::Archive);
        assert!(!should_sync(&e, ft, &hint));
    }

    #[test]
    fn archive_folder_still_synced_for_copy_to_archive_providers() {
        let hint = hint("outlook", ArchiveBehavior::CopyToArchive);
        let e = entry("Archive", &["archive"], true);
        let ft = folder_type(&e.imap_path, &e.attributes, &hint);
        assert!(should_sync(&e, ft, &hint));
    }
}
