//! Sync pass state machine.
//!
//! A pass runs strictly in order:
//!
//! ```text
//! Idle → GatheringLocalChanges → Pushing → ConflictResolution? → Pulling
//!      → Applying → Committing → Idle
//! ```
//!
//! and moves to `Failed` from any phase on error.
//!
//! ## Key Invariants
//!
//! - The cursor is committed only after every pulled change was applied
//! - Change-log entries are purged only after the cursor was committed
//! - Local writes happen only in Applying; a failed pass discards them
//! - At most one pass runs at a time

use crate::change_log::ChangeLog;
use crate::config::SyncConfig;
use crate::cursor::{CursorStore, SyncCursor};
use crate::error::{LocalStoreError, SyncError, SyncResult};
use crate::local::LocalStore;
use crate::remote::RemoteStore;
use crate::resolver::{ConflictResolver, Resolution};
use crate::zone::RemoteZone;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zonesync_protocol::{
    ChangeLogEntry, ConflictRecord, MutationKind, PushBatch, PushResult, RecordId, RecordRef,
    ServerCursor, Snapshot,
};

/// Phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No pass is running.
    Idle,
    /// Reading and materializing pending local changes.
    GatheringLocalChanges,
    /// Submitting local changes.
    Pushing,
    /// Resolving records the remote refused.
    ConflictResolution,
    /// Reading remote changes since the cursor.
    Pulling,
    /// Writing remote changes locally.
    Applying,
    /// Committing the cursor and purging consumed entries.
    Committing,
    /// The last pass failed.
    Failed,
}

impl SyncPhase {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncPhase::Idle | SyncPhase::Failed)
    }
}

/// Statistics across passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that completed.
    pub passes_completed: u64,
    /// Passes that failed.
    pub passes_failed: u64,
    /// Records saved or deleted remotely.
    pub records_pushed: u64,
    /// Remote changes and deletions applied locally.
    pub records_pulled: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// Retries performed by [`SyncCoordinator::sync_with_retry`].
    pub retries: u64,
    /// Completion time of the last successful pass.
    pub last_sync_time: Option<Instant>,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

/// Summary of a completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Records saved remotely (including resolved conflicts).
    pub pushed_saves: usize,
    /// Records deleted remotely.
    pub pushed_deletes: usize,
    /// Conflicts resolved in this pass.
    pub conflicts_resolved: usize,
    /// Remote records upserted locally.
    pub pulled_changes: usize,
    /// Remote deletions applied locally.
    pub pulled_deletes: usize,
    /// Records whose references never resolved.
    ///
    /// They are parked in the coordinator and retried first by its next
    /// pass, but the cursor is committed past them. Parked records live only
    /// in memory: a new coordinator (after a restart) does not see them, so
    /// callers that must not lose them should act on this list.
    pub missing_references: Vec<RecordId>,
    /// Whether a new cursor was committed.
    pub cursor_advanced: bool,
    /// Change-log entries purged.
    pub purged_entries: usize,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl SyncOutcome {
    /// Returns true if every pulled record was applied.
    pub fn is_complete(&self) -> bool {
        self.missing_references.is_empty()
    }

    /// The missing-reference report as an error, if any.
    pub fn missing_references_error(&self) -> Option<SyncError> {
        (!self.is_complete()).then(|| SyncError::MissingReferences(self.missing_references.clone()))
    }
}

/// Local changes captured for one pass.
#[derive(Debug, Default)]
struct LocalChanges {
    saves: Vec<Snapshot>,
    deletes: Vec<RecordId>,
    consumed: Vec<u64>,
}

/// What the push phase achieved.
#[derive(Debug, Default)]
struct PushReport {
    saved: Vec<Snapshot>,
    resolved: Vec<Snapshot>,
    local_deletes: Vec<RecordId>,
    deletes: usize,
    conflicts: usize,
}

/// What the pull phase collected.
#[derive(Debug, Default)]
struct PullReport {
    changed: Vec<Snapshot>,
    deleted: Vec<RecordId>,
    start: Option<ServerCursor>,
    end: Option<ServerCursor>,
}

/// What the apply phase did.
#[derive(Debug, Default)]
struct ApplyReport {
    upserted: usize,
    deleted: usize,
    missing: Vec<RecordId>,
}

/// Runs sync passes between a local store and a remote zone.
pub struct SyncCoordinator<L: LocalStore, R: RemoteStore> {
    config: SyncConfig,
    local: Arc<L>,
    remote: Arc<R>,
    change_log: Arc<ChangeLog>,
    cursor: SyncCursor,
    zone: RemoteZone,
    resolver: ConflictResolver,
    pass_lock: Mutex<()>,
    phase: RwLock<SyncPhase>,
    stats: RwLock<SyncStats>,
    zone_ready: AtomicBool,
    parked: Mutex<BTreeMap<RecordId, Snapshot>>,
}

impl<L: LocalStore, R: RemoteStore> SyncCoordinator<L, R> {
    /// Creates a coordinator.
    ///
    /// The change log must be the one `local` records application edits into.
    pub fn new(
        config: SyncConfig,
        local: Arc<L>,
        remote: Arc<R>,
        change_log: Arc<ChangeLog>,
        cursors: Arc<dyn CursorStore>,
    ) -> Self {
        let zone = RemoteZone::new(config.zone_name.clone());
        let cursor = SyncCursor::new(zone.zone_id().clone(), cursors);
        let resolver = ConflictResolver::from_config(&config);
        remote.configure_timeout(config.timeout);

        Self {
            config,
            local,
            remote,
            change_log,
            cursor,
            zone,
            resolver,
            pass_lock: Mutex::new(()),
            phase: RwLock::new(SyncPhase::Idle),
            stats: RwLock::new(SyncStats::default()),
            zone_ready: AtomicBool::new(false),
            parked: Mutex::new(BTreeMap::new()),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Statistics so far.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The zone this coordinator syncs.
    pub fn zone(&self) -> &RemoteZone {
        &self.zone
    }

    /// The committed cursor.
    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    /// The local store.
    pub fn local(&self) -> &Arc<L> {
        &self.local
    }

    /// The remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Records waiting for a referenced record to arrive.
    ///
    /// Held in memory only; see [`SyncOutcome::missing_references`].
    pub fn parked_records(&self) -> Vec<RecordId> {
        self.parked.lock().keys().cloned().collect()
    }

    fn set_phase(&self, phase: SyncPhase) {
        debug!(?phase, zone = %self.zone.zone_id(), "sync phase");
        *self.phase.write() = phase;
    }

    /// Runs one pass. Fails with `PassInProgress` if a pass is running.
    pub fn sync(&self) -> SyncResult<SyncOutcome> {
        let _guard = self.pass_lock.try_lock().ok_or(SyncError::PassInProgress)?;
        self.run_pass()
    }

    /// Runs one pass, waiting for a running pass to finish first.
    pub fn sync_queued(&self) -> SyncResult<SyncOutcome> {
        let _guard = self.pass_lock.lock();
        self.run_pass()
    }

    /// Runs passes until one succeeds or the error is not retryable.
    pub fn sync_with_retry(&self) -> SyncResult<SyncOutcome> {
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            match self.sync_queued() {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    warn!(attempt, error = %e, "sync pass failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run_pass(&self) -> SyncResult<SyncOutcome> {
        let start = Instant::now();

        match self.execute_pass() {
            Ok(mut outcome) => {
                outcome.duration = start.elapsed();
                self.set_phase(SyncPhase::Idle);

                let mut stats = self.stats.write();
                stats.passes_completed += 1;
                stats.records_pushed += (outcome.pushed_saves + outcome.pushed_deletes) as u64;
                stats.records_pulled += (outcome.pulled_changes + outcome.pulled_deletes) as u64;
                stats.conflicts_resolved += outcome.conflicts_resolved as u64;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;

                info!(
                    zone = %self.zone.zone_id(),
                    pushed = outcome.pushed_saves + outcome.pushed_deletes,
                    pulled = outcome.pulled_changes + outcome.pulled_deletes,
                    conflicts = outcome.conflicts_resolved,
                    missing = outcome.missing_references.len(),
                    "sync pass complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.local.discard_unsaved();
                self.set_phase(SyncPhase::Failed);
                if matches!(
                    e,
                    SyncError::ZoneCreationFailed { .. }
                        | SyncError::ZoneSubscriptionCreationFailed { .. }
                ) {
                    self.zone_ready.store(false, Ordering::SeqCst);
                }

                let mut stats = self.stats.write();
                stats.passes_failed += 1;
                stats.last_error = Some(e.to_string());

                warn!(zone = %self.zone.zone_id(), error = %e, "sync pass failed");
                Err(e)
            }
        }
    }

    fn execute_pass(&self) -> SyncResult<SyncOutcome> {
        if !self.zone_ready.load(Ordering::SeqCst) {
            self.zone.ensure_exists(self.remote.as_ref())?;
            self.zone_ready.store(true, Ordering::SeqCst);
        }

        self.set_phase(SyncPhase::GatheringLocalChanges);
        let changes = self.gather_local_changes()?;

        self.set_phase(SyncPhase::Pushing);
        let pushed = self.push(&changes)?;

        self.set_phase(SyncPhase::Pulling);
        let pulled = self.pull()?;

        self.set_phase(SyncPhase::Applying);
        let applied = self.apply(&pushed, &pulled)?;

        self.set_phase(SyncPhase::Committing);
        let cursor_advanced = match &pulled.end {
            Some(end) if pulled.start.as_ref() != Some(end) => {
                self.cursor.commit(end)?;
                true
            }
            _ => false,
        };
        let purged_entries = self.change_log.purge(&changes.consumed)?;

        Ok(SyncOutcome {
            pushed_saves: pushed.saved.len() + pushed.resolved.len(),
            pushed_deletes: pushed.deletes,
            conflicts_resolved: pushed.conflicts,
            pulled_changes: applied.upserted,
            pulled_deletes: applied.deleted,
            missing_references: applied.missing,
            cursor_advanced,
            purged_entries,
            duration: Duration::ZERO,
        })
    }

    /// Captures the pass and turns queued entries into a push set.
    fn gather_local_changes(&self) -> SyncResult<LocalChanges> {
        let captured = self.change_log.begin_pass()?;
        debug!(captured, "captured local changes");

        let mut changes = LocalChanges::default();
        let mut folded: BTreeMap<RecordId, ChangeLogEntry> = BTreeMap::new();
        let mut after = None;
        loop {
            let page = self
                .change_log
                .queued_changes(after, self.config.change_page_size)?;
            for entry in page.entries {
                changes.consumed.push(entry.seq);
                // a second entry for a record means an earlier pass captured
                // the first one and failed, possibly after pushing it
                match folded.get_mut(&entry.unique_id) {
                    Some(prior) => {
                        prior.absorb_captured(entry.mutation_kind, entry.changed_fields)
                    }
                    None => {
                        folded.insert(entry.unique_id.clone(), entry);
                    }
                }
            }
            match page.next {
                Some(next) => after = Some(next),
                None => break,
            }
        }

        for (id, entry) in folded {
            if entry.mutation_kind == MutationKind::Deleted {
                changes.deletes.push(id);
                continue;
            }
            if let Some(snapshot) = self.materialize(&entry)? {
                changes.saves.push(snapshot);
            }
        }

        changes.saves = newest_per_record(changes.saves);
        Ok(changes)
    }

    /// Builds the snapshot to push for an insert or update entry.
    fn materialize(&self, entry: &ChangeLogEntry) -> SyncResult<Option<Snapshot>> {
        let stored = self
            .local
            .fetch(&entry.unique_id)
            .map_err(|source| SyncError::LocalChangesFetch { source })?;
        let Some(stored) = stored else {
            debug!(record = %entry.unique_id, "changed record no longer exists");
            return Ok(None);
        };

        let Some(schema) = self.local.schemas().get(&stored.entity_type) else {
            warn!(
                record = %entry.unique_id,
                entity = %stored.entity_type,
                "skipping change to unmanaged entity type"
            );
            return Ok(None);
        };

        let syncable = schema.syncable_fields();
        let full = entry.mutation_kind == MutationKind::Inserted || stored.change_tag.is_none();
        let fields: BTreeSet<String> = if full {
            syncable
        } else {
            entry
                .changed_fields
                .intersection(&syncable)
                .cloned()
                .collect()
        };

        if fields.is_empty() && !full {
            debug!(record = %entry.unique_id, "no syncable field changed");
            return Ok(None);
        }
        Ok(Some(stored.project(&fields)))
    }

    /// Pushes the gathered changes, resolving conflicts once if needed.
    fn push(&self, changes: &LocalChanges) -> SyncResult<PushReport> {
        let batch = PushBatch {
            saves: changes.saves.clone(),
            deletes: changes.deletes.clone(),
        };
        if batch.is_empty() {
            return Ok(PushReport::default());
        }

        let result = self.remote.modify_records(self.zone.zone_id(), &batch)?;
        let mut report = PushReport {
            deletes: batch.deletes.len(),
            ..PushReport::default()
        };

        match inspect_push(&batch, &result) {
            Ok(saved) => {
                report.saved = saved;
                Ok(report)
            }
            Err(SyncError::ConflictsDetected(conflicts)) => {
                report.saved = result.saved().cloned().collect();
                self.resolve_conflicts(&batch, conflicts, report)
            }
            Err(e) => Err(e),
        }
    }

    fn resolve_conflicts(
        &self,
        batch: &PushBatch,
        conflicts: Vec<ConflictRecord>,
        mut report: PushReport,
    ) -> SyncResult<PushReport> {
        self.set_phase(SyncPhase::ConflictResolution);
        info!(count = conflicts.len(), policy = %self.resolver.policy(), "resolving conflicts");

        let ids: Vec<RecordId> = conflicts.iter().map(|c| c.record_id().clone()).collect();
        let mut server: BTreeMap<RecordId, Snapshot> = self
            .remote
            .fetch_records(self.zone.zone_id(), &ids, None)?
            .into_iter()
            .map(|s| (s.record_id.clone(), s))
            .collect();

        let mut merged: BTreeMap<RecordId, Snapshot> = batch
            .saves
            .iter()
            .map(|s| (s.record_id.clone(), s.clone()))
            .collect();
        let mut retried = BTreeSet::new();

        for mut conflict in conflicts {
            let id = conflict.record_id().clone();
            conflict.server = server.remove(&id);
            if conflict.server.is_none() {
                // a recreate must carry every field, not just the changed ones
                if let Some(full) = self.full_local_copy(&id)? {
                    conflict.client = full;
                }
            }
            match self.resolver.resolve(&conflict) {
                Resolution::Push(winner) => {
                    merged.insert(id.clone(), winner);
                    retried.insert(id);
                }
                Resolution::DeleteLocal => {
                    merged.remove(&id);
                    report.local_deletes.push(id);
                }
            }
            report.conflicts += 1;
        }

        // only what the first attempt did not already store
        let retry = PushBatch {
            saves: merged
                .into_iter()
                .filter(|(id, _)| retried.contains(id))
                .map(|(_, s)| s)
                .collect(),
            deletes: Vec::new(),
        };
        if retry.is_empty() {
            return Ok(report);
        }

        self.set_phase(SyncPhase::Pushing);
        let result = self.remote.modify_records(self.zone.zone_id(), &retry)?;
        match inspect_push(&retry, &result) {
            Ok(saved) => {
                report.resolved = saved;
                Ok(report)
            }
            Err(SyncError::ConflictsDetected(again)) => Err(SyncError::UnresolvedConflicts(
                again.iter().map(|c| c.record_id().clone()).collect(),
            )),
            Err(e) => Err(e),
        }
    }

    fn full_local_copy(&self, id: &RecordId) -> SyncResult<Option<Snapshot>> {
        let stored = self
            .local
            .fetch(id)
            .map_err(|source| SyncError::LocalChangesFetch { source })?;
        Ok(stored.and_then(|snapshot| {
            let fields = self.local.schemas().get(&snapshot.entity_type)?.syncable_fields();
            Some(snapshot.project(&fields))
        }))
    }

    /// Reads the change feed from the committed cursor to its end.
    fn pull(&self) -> SyncResult<PullReport> {
        let start = self.cursor.load()?;
        let mut working = start.clone();
        let mut latest: BTreeMap<RecordId, (RecordRef, bool)> = BTreeMap::new();

        loop {
            let page = self.remote.fetch_changes(
                self.zone.zone_id(),
                working.as_ref(),
                self.config.change_page_size,
            )?;
            for changed in page.changed {
                latest.insert(changed.record_id.clone(), (changed, false));
            }
            for deleted in page.deleted {
                latest.insert(deleted.record_id.clone(), (deleted, true));
            }
            working = Some(page.cursor);
            if !page.more_coming {
                break;
            }
        }

        let schemas = self.local.schemas();
        let mut unmanaged = BTreeSet::new();
        let mut changed_ids = Vec::new();
        let mut touched_types = BTreeSet::new();
        let mut deleted = Vec::new();

        for (id, (summary, is_delete)) in latest {
            if !schemas.contains(&summary.entity_type) {
                unmanaged.insert(summary.entity_type);
                continue;
            }
            if is_delete {
                deleted.push(id);
            } else {
                touched_types.insert(summary.entity_type);
                changed_ids.push(id);
            }
        }
        for entity in unmanaged {
            warn!(entity = %entity, "skipping remote changes to unmanaged entity type");
        }

        let changed = if changed_ids.is_empty() {
            Vec::new()
        } else {
            let fields = schemas.syncable_fields_for(touched_types.iter().map(String::as_str));
            self.remote
                .fetch_records(self.zone.zone_id(), &changed_ids, Some(&fields))?
        };

        debug!(changed = changed.len(), deleted = deleted.len(), "pulled remote changes");
        Ok(PullReport {
            changed,
            deleted,
            start,
            end: working,
        })
    }

    /// Writes push results and pulled changes into the local store.
    fn apply(&self, pushed: &PushReport, pulled: &PullReport) -> SyncResult<ApplyReport> {
        let mut report = ApplyReport::default();

        for saved in &pushed.saved {
            self.local
                .set_change_tag(&saved.record_id, saved.change_tag.clone())?;
        }

        let mut removed: BTreeSet<RecordId> = BTreeSet::new();
        for id in pushed.local_deletes.iter().chain(&pulled.deleted) {
            if self.local.delete(id)? {
                report.deleted += 1;
            }
            removed.insert(id.clone());
        }

        let mut upserts = self.parked.lock().clone();
        for snapshot in pushed.resolved.iter().chain(&pulled.changed) {
            upserts.insert(snapshot.record_id.clone(), snapshot.clone());
        }
        upserts.retain(|id, _| !removed.contains(id));

        let mut pending = Vec::with_capacity(upserts.len());
        for snapshot in upserts.into_values() {
            if let Some(snapshot) = self.keep_local_edits(snapshot)? {
                pending.push(snapshot);
            }
        }

        let limit = self.config.missing_reference_retry_limit;
        let mut round = 0;
        while !pending.is_empty() {
            let mut deferred = Vec::new();
            for snapshot in pending {
                match self.local.upsert(&snapshot) {
                    Ok(()) => report.upserted += 1,
                    Err(LocalStoreError::MissingReference { target, .. }) => {
                        debug!(record = %snapshot.record_id, %target, round, "deferring record");
                        deferred.push(snapshot);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if round == limit {
                pending = deferred;
                break;
            }
            pending = deferred;
            round += 1;
        }

        self.local.save_if_changed()?;

        if !pending.is_empty() {
            warn!(
                count = pending.len(),
                retries = limit,
                "records still reference missing records"
            );
        }
        report.missing = pending.iter().map(|s| s.record_id.clone()).collect();
        *self.parked.lock() = pending
            .into_iter()
            .map(|s| (s.record_id.clone(), s))
            .collect();

        Ok(report)
    }

    /// Lays local edits made since the pass started over a remote snapshot.
    ///
    /// Those edits are not part of this pass and must survive it so the next
    /// pass can push them. The remote change tag is still adopted. Returns
    /// `None` if the record was deleted locally in the meantime.
    fn keep_local_edits(&self, remote: Snapshot) -> SyncResult<Option<Snapshot>> {
        let Some(open) = self.change_log.open_entry(&remote.record_id) else {
            return Ok(Some(remote));
        };
        if open.mutation_kind == MutationKind::Deleted {
            debug!(record = %remote.record_id, "record deleted during the pass");
            return Ok(None);
        }
        let Some(stored) = self.local.fetch(&remote.record_id)? else {
            return Ok(Some(remote));
        };

        debug!(record = %remote.record_id, "keeping local edits made during the pass");
        let whole = open.mutation_kind == MutationKind::Inserted;
        let mut merged = remote;
        for (name, value) in stored.fields {
            if whole || open.changed_fields.contains(&name) {
                merged.fields.insert(name, value);
            }
        }
        merged.modified_at = merged.modified_at.max(stored.modified_at);
        Ok(Some(merged))
    }
}

/// Keeps one save per record, the one with the newest `modified_at`.
fn newest_per_record(saves: Vec<Snapshot>) -> Vec<Snapshot> {
    let mut newest: BTreeMap<RecordId, Snapshot> = BTreeMap::new();
    for snapshot in saves {
        match newest.get(&snapshot.record_id) {
            Some(kept) if kept.modified_at > snapshot.modified_at => {}
            _ => {
                newest.insert(snapshot.record_id.clone(), snapshot);
            }
        }
    }
    newest.into_values().collect()
}

/// Checks per-record outcomes.
///
/// Returns the stored snapshots on success, `ConflictsDetected` if any save
/// was stale, or a fatal `RemoteBatch` if any record failed outright.
fn inspect_push(batch: &PushBatch, result: &PushResult) -> SyncResult<Vec<Snapshot>> {
    if let Some((id, reason)) = result.failed().next() {
        return Err(SyncError::remote_fatal(format!(
            "record {id} was rejected: {reason}"
        )));
    }

    let stale: BTreeSet<&RecordId> = result.stale().collect();
    if !stale.is_empty() {
        let conflicts = batch
            .saves
            .iter()
            .filter(|s| stale.contains(&s.record_id))
            .map(|s| ConflictRecord::new(s.clone(), None))
            .collect();
        return Err(SyncError::ConflictsDetected(conflicts));
    }

    Ok(result.saved().cloned().collect())
}
