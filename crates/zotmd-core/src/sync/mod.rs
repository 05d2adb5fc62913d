//! Sync runs
//!
//! One run moves through these phases:
//!
//! 1. **Fetching**: read the cursor, ask the remote for its library version
//!    and decide between an incremental and a full pass
//! 2. **Reconciling**: remove files for deleted items, then bring every
//!    changed item's file and state record up to date
//! 3. **Finalizing**: advance the cursor and record the renderer fingerprint
//!
//! A run that is cancelled or aborted never advances the cursor, so the next
//! run sees the same changes again.

pub mod engine;
pub mod summary;

pub use engine::{decide_mode, EngineOptions, SyncEngine, SyncPhase};
pub use summary::{AnnotationCounts, FullSyncReason, SyncSummary};
