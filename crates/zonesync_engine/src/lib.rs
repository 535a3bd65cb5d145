//! # zonesync engine
//!
//! Bidirectional sync between a local object store and a remote zone.
//!
//! This crate provides:
//! - [`ChangeLog`]: durable ledger of pending local mutations
//! - [`SyncCursor`] and [`CursorStore`]: committed position in the remote feed
//! - [`RemoteZone`]: zone and subscription bootstrap
//! - [`ConflictResolver`]: server-wins, client-wins or caller-decides
//! - [`SyncCoordinator`]: the pass state machine
//! - [`SyncScheduler`]: queued and periodic passes on tokio
//!
//! ## Architecture
//!
//! One pass pushes before it pulls:
//! 1. Capture and materialize pending local changes
//! 2. Push them; resolve stale-version conflicts and push once more
//! 3. Pull remote changes since the committed cursor
//! 4. Apply them locally, deferring records with dangling references
//! 5. Commit the cursor, then purge the consumed change-log entries
//!
//! The local and remote stores are collaborators behind the [`LocalStore`]
//! and [`RemoteStore`] traits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_log;
mod config;
mod coordinator;
mod cursor;
mod error;
mod local;
mod persist;
mod remote;
mod resolver;
mod scheduler;
mod zone;

pub use change_log::ChangeLog;
pub use config::{
    ConflictCallback, RetryConfig, SyncConfig, DEFAULT_CHANGE_PAGE_SIZE,
    DEFAULT_MISSING_REFERENCE_RETRY_LIMIT,
};
pub use coordinator::{SyncCoordinator, SyncOutcome, SyncPhase, SyncStats};
pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore, SyncCursor};
pub use error::{ChangeLogError, CursorError, LocalStoreError, SyncError, SyncResult};
pub use local::{now_millis, LocalStore, MemoryLocalStore};
pub use remote::{MockRemoteStore, RemoteStore};
pub use resolver::{ConflictResolver, Resolution};
pub use scheduler::SyncScheduler;
pub use zone::RemoteZone;
