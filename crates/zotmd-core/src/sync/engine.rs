//! Sync orchestrator
//!
//! Drives one run: lock, open the store, fetch the item universe, reconcile
//! items one at a time, then advance the cursor.
//!
//! Per item the file operation always happens before the store update, so a
//! crash leaves at worst a file without a record, which the next run adopts.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;

use crate::annotations::merge;
use crate::config::{Config, DeletionBehavior};
use crate::detector::{classify, removals_for_full_scan, Action, Fingerprints, SyncMode};
use crate::document::{self, machine_region, split, split_frontmatter, Regions};
use crate::error::{ItemError, ItemErrorKind, SyncError};
use crate::lock::{CancelFlag, RunLock};
use crate::models::{RecordStatus, RemoteAnnotation, RemoteItem, SyncStateRecord};
use crate::reconciler::{FileReconciler, RemovalOutcome, WriteOutcome};
use crate::remote::{RemoteError, RemoteLibrary, RetryPolicy};
use crate::render::{ItemContext, Renderer};
use crate::storage::{StoreError, SyncStateStore};

use super::summary::{FullSyncReason, SyncSummary};

/// Where the engine reads and writes
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub output_dir: PathBuf,
    pub quarantine_dir: String,
    pub deletion_behavior: DeletionBehavior,
    pub db_path: PathBuf,
    pub lock_path: PathBuf,
    pub retry: RetryPolicy,
    pub full_sync_threshold: i64,
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let output_dir = config
            .output_dir
            .clone()
            .context("output_dir is not configured")?;

        Ok(Self {
            output_dir,
            quarantine_dir: config.quarantine_dir.clone(),
            deletion_behavior: config.deletion_behavior,
            db_path: config.db_path(),
            lock_path: config.lock_path(),
            retry: config.retry(),
            full_sync_threshold: config.full_sync_threshold,
        })
    }
}

/// Stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Fetching,
    Reconciling,
    Finalizing,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::Finalizing => "finalizing",
            SyncPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Decide whether a run is incremental or full
pub fn decide_mode(
    requested: SyncMode,
    cursor: Option<i64>,
    current_version: i64,
    stored_template: Option<&str>,
    template: &str,
    full_sync_threshold: i64,
) -> (SyncMode, Option<FullSyncReason>) {
    if requested == SyncMode::Full {
        return (SyncMode::Full, Some(FullSyncReason::Requested));
    }

    let Some(cursor) = cursor else {
        return (SyncMode::Full, Some(FullSyncReason::NoCursor));
    };

    if current_version < cursor {
        return (SyncMode::Full, Some(FullSyncReason::VersionRegressed));
    }

    if stored_template.is_some_and(|stored| stored != template) {
        return (SyncMode::Full, Some(FullSyncReason::TemplateChanged));
    }

    let gap = current_version - cursor;
    if gap > full_sync_threshold {
        return (SyncMode::Full, Some(FullSyncReason::VersionGap { gap }));
    }

    (SyncMode::Incremental, None)
}

/// Everything fetched during the FETCHING phase
struct Universe {
    items: Vec<RemoteItem>,
    deleted: Vec<String>,
}

/// How a single item failed
enum Failure {
    /// Recorded in the summary; the run continues
    Item(ItemError),
    /// Aborts the run
    Fatal(SyncError),
}

impl Failure {
    fn fatal(err: impl Into<SyncError>) -> Self {
        Failure::Fatal(err.into())
    }

    fn item(item_key: &str, citation_key: &str, kind: ItemErrorKind, message: impl fmt::Display) -> Self {
        Failure::Item(ItemError::new(item_key, Some(citation_key), kind, message))
    }
}

/// One item ready to be written
struct Planned<'r> {
    item: &'r RemoteItem,
    citation_key: &'r str,
    live: Option<&'r SyncStateRecord>,
    annotations: Vec<RemoteAnnotation>,
    fingerprints: Fingerprints,
    action: Action,
}

/// Drives sync runs against one output tree and state store
pub struct SyncEngine<'a> {
    options: EngineOptions,
    remote: &'a dyn RemoteLibrary,
    renderer: &'a dyn Renderer,
    reconciler: FileReconciler,
    cancel: CancelFlag,
    phase: SyncPhase,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        options: EngineOptions,
        remote: &'a dyn RemoteLibrary,
        renderer: &'a dyn Renderer,
    ) -> Self {
        let reconciler = FileReconciler::new(
            options.output_dir.clone(),
            options.quarantine_dir.clone(),
            options.deletion_behavior,
        );

        Self {
            options,
            remote,
            renderer,
            reconciler,
            cancel: CancelFlag::new(),
            phase: SyncPhase::Idle,
        }
    }

    /// Use an externally owned cancel flag
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Run one sync
    ///
    /// Item-level failures are reported in the summary. An `Err` means the
    /// run was aborted and the cursor was not advanced.
    pub fn run(&mut self, requested: SyncMode) -> Result<SyncSummary, SyncError> {
        let started = Instant::now();

        match self.run_inner(requested, started) {
            Ok(summary) => {
                self.enter(SyncPhase::Idle);
                Ok(summary)
            }
            Err(err) => {
                self.enter(SyncPhase::Failed);
                tracing::error!("Sync aborted: {}", err);
                Err(err)
            }
        }
    }

    fn enter(&mut self, phase: SyncPhase) {
        tracing::debug!("Sync phase: {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    fn run_inner(
        &mut self,
        requested: SyncMode,
        started: Instant,
    ) -> Result<SyncSummary, SyncError> {
        let _lock = RunLock::acquire(&self.options.lock_path)?;
        let mut store = SyncStateStore::open(&self.options.db_path)?;

        fs::create_dir_all(&self.options.output_dir).map_err(|source| SyncError::OutputDir {
            path: self.options.output_dir.clone(),
            source,
        })?;

        self.enter(SyncPhase::Fetching);

        let cursor = store.cursor()?;
        let current = self.fetch("library version", || self.remote.current_version())?;
        let template = self.renderer.fingerprint();
        let stored_template = store.template_fingerprint()?;

        let (mode, reason) = decide_mode(
            requested,
            cursor,
            current,
            stored_template.as_deref(),
            &template,
            self.options.full_sync_threshold,
        );

        let mut summary = SyncSummary::new(mode, cursor);
        summary.full_sync_reason = reason;
        summary.library_version = Some(current);

        if let Some(reason) = reason {
            tracing::info!("Running full sync ({:?})", reason);
        }

        if mode == SyncMode::Incremental && cursor == Some(current) {
            tracing::info!("Library unchanged at version {}", current);
            store.set_template_fingerprint(&template)?;
            summary.store_writes = store.mutation_count();
            summary.elapsed = started.elapsed();
            return Ok(summary);
        }

        let universe = self.fetch_universe(mode, cursor)?;
        tracing::info!(
            "Fetched {} items ({} deletions) at library version {}",
            universe.items.len(),
            universe.deleted.len(),
            current
        );

        self.enter(SyncPhase::Reconciling);

        let remote_keys: HashSet<&str> = universe.items.iter().map(|i| i.key.as_str()).collect();

        // Removals go first so a citation key freed by a deleted item can be
        // taken by another item in the same run
        let removals: Vec<SyncStateRecord> = match mode {
            SyncMode::Full => {
                let live = store.all_live()?;
                removals_for_full_scan(&live, &remote_keys)
                    .into_iter()
                    .cloned()
                    .collect()
            }
            SyncMode::Incremental => {
                let mut records = Vec::new();
                for key in &universe.deleted {
                    // An item reported both changed and deleted was restored
                    if remote_keys.contains(key.as_str()) {
                        continue;
                    }
                    if let Some(record) = store.get(key)?.filter(|r| r.is_live()) {
                        records.push(record);
                    }
                }
                records
            }
        };

        for record in &removals {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            summary.processed += 1;
            let result = self.remove_record(&mut store, record, &mut summary);
            self.absorb(result, &mut summary)?;
        }

        let mut seen: HashSet<&str> = HashSet::with_capacity(universe.items.len());
        for item in &universe.items {
            if summary.cancelled || self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if !seen.insert(item.key.as_str()) {
                continue;
            }

            summary.processed += 1;
            let result = self.reconcile_item(&mut store, item, mode, current, &mut summary);
            self.absorb(result, &mut summary)?;
        }

        if summary.cancelled {
            summary.warn(format!(
                "Sync cancelled after {} items; cursor left at {}",
                summary.processed,
                cursor.map_or_else(|| "none".to_string(), |c| c.to_string())
            ));
            summary.store_writes = store.mutation_count();
            summary.elapsed = started.elapsed();
            return Ok(summary);
        }

        self.enter(SyncPhase::Finalizing);

        match cursor {
            Some(previous) if current < previous => summary.warn(format!(
                "Library version {} is lower than the stored cursor {}; cursor kept",
                current, previous
            )),
            _ => store.set_cursor(current)?,
        }
        store.set_template_fingerprint(&template)?;
        if mode == SyncMode::Full {
            store.record_full_sync(Utc::now())?;
        }

        if !summary.errors.is_empty() && mode == SyncMode::Incremental {
            summary.warn(format!(
                "{} items failed; run `zotmd sync --full` to retry them",
                summary.errors.len()
            ));
        }

        summary.finish_version = store.cursor()?;
        summary.store_writes = store.mutation_count();
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    fn absorb(&self, result: Result<(), Failure>, summary: &mut SyncSummary) -> Result<(), SyncError> {
        match result {
            Ok(()) => Ok(()),
            Err(Failure::Item(err)) => {
                tracing::warn!("{}", err);
                summary.errors.push(err);
                Ok(())
            }
            Err(Failure::Fatal(err)) => Err(err),
        }
    }

    /// Run a universe-level remote call; exhausted retries abort the run
    fn fetch<T>(
        &self,
        operation: &str,
        op: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, SyncError> {
        self.options
            .retry
            .run(operation, Some(&self.cancel), op)
            .map_err(|err| match err {
                RemoteError::Transient(msg) => {
                    SyncError::RemoteUnavailable(format!("{}: {}", operation, msg))
                }
                RemoteError::Auth(msg) => SyncError::Auth(msg),
                RemoteError::Invalid(msg) => {
                    SyncError::RemoteInvalid(format!("{}: {}", operation, msg))
                }
            })
    }

    fn fetch_universe(&self, mode: SyncMode, cursor: Option<i64>) -> Result<Universe, SyncError> {
        match (mode, cursor) {
            (SyncMode::Incremental, Some(since)) => Ok(Universe {
                items: self.fetch("changed items", || self.remote.items_changed_since(since))?,
                deleted: self.fetch("deleted items", || self.remote.deleted_item_keys(since))?,
            }),
            _ => Ok(Universe {
                items: self.fetch("all items", || self.remote.all_items())?,
                deleted: Vec::new(),
            }),
        }
    }

    fn fetch_annotations(
        &self,
        item: &RemoteItem,
        citation_key: &str,
        summary: &mut SyncSummary,
    ) -> Result<Vec<RemoteAnnotation>, Failure> {
        let mut annotations = Vec::new();

        for attachment in &item.attachments {
            let fetched = self.options.retry.run("annotations", Some(&self.cancel), || {
                self.remote.annotations_for(&attachment.key)
            });

            match fetched {
                Ok(mut found) => annotations.append(&mut found),
                Err(RemoteError::Auth(msg)) => return Err(Failure::Fatal(SyncError::Auth(msg))),
                Err(err @ RemoteError::Transient(_)) => {
                    summary.warn(format!(
                        "Giving up on annotations for {} after {} attempts: {}",
                        citation_key, self.options.retry.max_attempts, err
                    ));
                    return Err(Failure::item(&item.key, citation_key, ItemErrorKind::Remote, err));
                }
                Err(err) => {
                    return Err(Failure::item(&item.key, citation_key, ItemErrorKind::Remote, err))
                }
            }
        }

        Ok(annotations)
    }

    fn reconcile_item(
        &self,
        store: &mut SyncStateStore,
        item: &RemoteItem,
        mode: SyncMode,
        library_version: i64,
        summary: &mut SyncSummary,
    ) -> Result<(), Failure> {
        let record = store.get(&item.key).map_err(Failure::fatal)?;

        let citation_key = match item.citation_key() {
            Some(key) if item.is_eligible() => key,
            _ => {
                return match (classify(item, record.as_ref(), None, mode), record) {
                    (Action::Remove, Some(record)) => {
                        tracing::info!("{} is no longer eligible for sync", record.citation_key);
                        self.remove_record(store, &record, summary)
                    }
                    _ => {
                        summary.ineligible += 1;
                        Ok(())
                    }
                };
            }
        };

        let annotations = self.fetch_annotations(item, citation_key, summary)?;
        let fingerprints = Fingerprints::compute(citation_key, item, &annotations);
        let live = record.as_ref().filter(|r| r.is_live());
        let action = classify(item, live, Some(&fingerprints), mode);
        tracing::debug!(item = %item.key, %action, "Classified {}", citation_key);

        match action {
            Action::Skip => {
                summary.skipped += 1;
                Ok(())
            }
            Action::Create | Action::UpdateFull | Action::UpdateAnnotationsOnly => {
                let plan = Planned {
                    item,
                    citation_key,
                    live,
                    annotations,
                    fingerprints,
                    action,
                };
                self.write_item(store, plan, library_version, summary)
            }
            // Only produced for ineligible items, handled above
            Action::Remove | Action::Ineligible => Ok(()),
        }
    }

    fn write_item(
        &self,
        store: &mut SyncStateStore,
        plan: Planned<'_>,
        library_version: i64,
        summary: &mut SyncSummary,
    ) -> Result<(), Failure> {
        let Planned {
            item,
            citation_key,
            live,
            annotations,
            fingerprints,
            action,
        } = plan;
        let fail = |kind, message: &dyn fmt::Display| Failure::item(&item.key, citation_key, kind, message);

        let target = self.reconciler.target_path(citation_key);

        if let Some(owner) = store.live_by_path(&target).map_err(Failure::fatal)? {
            if owner.item_key != item.key {
                return Err(fail(
                    ItemErrorKind::Collision,
                    &format!(
                        "'{}' already belongs to {} (item {})",
                        target, owner.citation_key, owner.item_key
                    ),
                ));
            }
        }

        let current_path = live.map(|r| r.file_path.as_str());
        let moving_from = current_path.filter(|old| *old != target);
        let mut existing = self
            .reconciler
            .read(current_path.unwrap_or(&target))
            .map_err(|e| fail(ItemErrorKind::Write, &e))?;
        if existing.is_none() && moving_from.is_some() {
            // A run that stopped mid-move already wrote the new path
            existing = self
                .reconciler
                .read(&target)
                .map_err(|e| fail(ItemErrorKind::Write, &e))?;
        }

        let regions = match existing.as_deref() {
            Some(text) => split(text).map_err(|e| fail(ItemErrorKind::Split, &e))?,
            None => Regions::new(String::new(), self.renderer.user_region_seed()),
        };
        if live.is_none() && existing.is_some() && !regions.is_managed() {
            tracing::info!("Keeping existing content of {} as user notes", target);
        }

        let previous: &[RemoteAnnotation] = live.map(|r| r.annotations.as_slice()).unwrap_or(&[]);
        let merged = merge(previous, &annotations);

        let body = self
            .renderer
            .render(&ItemContext::new(item, &merged.annotations))
            .map_err(|e| fail(ItemErrorKind::Render, &e))?;

        let kept_frontmatter = match action {
            Action::UpdateAnnotationsOnly => regions
                .machine
                .as_deref()
                .and_then(|machine| split_frontmatter(machine).0),
            _ => None,
        };
        let machine = match kept_frontmatter {
            Some(frontmatter) => machine_region(frontmatter, &body),
            None => machine_region(&document::frontmatter(item), &body),
        };
        let text = regions.with_machine(machine).compose();

        let outcome = self
            .reconciler
            .write(&target, &text)
            .map_err(|e| fail(ItemErrorKind::Write, &e))?;

        let record = SyncStateRecord {
            item_key: item.key.clone(),
            citation_key: citation_key.to_string(),
            metadata_hash: fingerprints.metadata,
            annotations_hash: fingerprints.annotations,
            file_path: target,
            library_version,
            item_version: item.version,
            status: RecordStatus::Active,
            annotations: merged.current(),
            synced_at: Utc::now(),
        };

        if live.map_or(true, |old| !old.same_state(&record)) {
            match store.put(&record) {
                Ok(()) => {}
                Err(err @ StoreError::PathConflict { .. }) => {
                    return Err(fail(ItemErrorKind::Collision, &err))
                }
                Err(err) => return Err(Failure::fatal(err)),
            }
        }

        // The old file goes only once the record points at the new one
        if let Some(old) = moving_from {
            self.reconciler
                .discard(old)
                .map_err(|e| fail(ItemErrorKind::Write, &e))?;
            tracing::debug!("Moved {} to {}", old, record.file_path);
        }

        summary.annotations.add(&merged);
        match (action, outcome) {
            (Action::Create, _) => summary.created += 1,
            (_, WriteOutcome::Written) => summary.updated += 1,
            (_, WriteOutcome::Unchanged) if moving_from.is_some() => summary.updated += 1,
            (_, WriteOutcome::Unchanged) => summary.unchanged += 1,
        }
        Ok(())
    }

    fn remove_record(
        &self,
        store: &mut SyncStateStore,
        record: &SyncStateRecord,
        summary: &mut SyncSummary,
    ) -> Result<(), Failure> {
        let outcome = self.reconciler.remove(&record.file_path).map_err(|e| {
            Failure::item(&record.item_key, &record.citation_key, ItemErrorKind::Write, e)
        })?;

        match self.reconciler.behavior() {
            DeletionBehavior::Move => {
                let quarantined = match &outcome {
                    RemovalOutcome::Quarantined(path) => Some(path.as_str()),
                    _ => None,
                };
                store
                    .mark_removed(&record.item_key, quarantined)
                    .map_err(Failure::fatal)?;
            }
            DeletionBehavior::Delete => {
                store.purge(&record.item_key).map_err(Failure::fatal)?;
            }
        }

        if outcome == RemovalOutcome::Missing {
            tracing::debug!("File for {} was already gone", record.citation_key);
        }
        tracing::info!("Removed {}", record.citation_key);
        summary.removed += 1;
        Ok(())
    }
}
