//! Sync subsystem: identity/thread resolution, per-folder message sync,
//! staged initial-fast sync, write-side reconciliation, and the
//! `SyncEngine` that ties it all together (§4.9, C8, C9).

mod coordinator;
mod engine;
mod folder_list;
mod identity;
mod initial_fast;
mod message_sync;
mod reconcile;
mod subject;
mod thread;

pub use coordinator::{FolderSyncCoordinator, FolderSyncGuard};
pub use engine::{AccountSyncMode, FolderSyncMode, SyncEngine};
pub use folder_list::{folder_type, should_sync, upsert_candidate, ProviderHint};
pub use identity::{canonical_key, resolve_identity, IdentityResolution};
pub use initial_fast::{
    run_catch_up_loop, stage_a_list_folders, stage_b_inbox_fast, stage_c_budget_allocate, CatchUpHandle, InitialFastOutcome,
};
pub use message_sync::{sync_folder_messages, MessageSyncMode, MessageSyncOutcome};
pub use reconcile::{apply_flag_change, archive_messages, move_messages, FlagChange};
pub use subject::normalize_subject;
pub use thread::resolve_thread;
