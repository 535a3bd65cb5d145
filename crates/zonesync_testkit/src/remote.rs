//! A remote over the reference server with injectable faults.
//!
//! Every call goes to a shared [`ZoneServer`] unless a fault was queued for
//! that operation, in which case the fault is returned instead and the
//! server is not touched. Actions queued with [`FaultyRemote::before_next`]
//! run just before a call, which lets tests edit local records while a pass
//! is in flight.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use zonesync_engine::{RemoteStore, SyncError, SyncResult};
use zonesync_protocol::{
    ChangesPage, PushBatch, PushResult, RecordId, ServerCursor, Snapshot, SubscriptionId, ZoneId,
};
use zonesync_server::{ServerError, ZoneServer};

/// Remote operations that faults can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RemoteOp {
    /// `zone_exists`
    ZoneExists,
    /// `create_zone`
    CreateZone,
    /// `subscription_exists`
    SubscriptionExists,
    /// `create_subscription`
    CreateSubscription,
    /// `modify_records`
    ModifyRecords,
    /// `fetch_changes`
    FetchChanges,
    /// `fetch_records`
    FetchRecords,
}

/// A fault to return from one remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The call timed out.
    Timeout,
    /// A transient failure, such as the network being down.
    Transient(String),
    /// A permanent failure, such as a quota being exceeded.
    Permanent(String),
}

impl Fault {
    fn into_error(self) -> SyncError {
        match self {
            Fault::Timeout => SyncError::Timeout,
            Fault::Transient(message) => SyncError::remote_retryable(message),
            Fault::Permanent(message) => SyncError::remote_fatal(message),
        }
    }
}

/// Converts a server error into the engine's error.
pub fn server_error(e: ServerError) -> SyncError {
    if e.is_retryable() {
        SyncError::remote_retryable(e.to_string())
    } else {
        SyncError::remote_fatal(e.to_string())
    }
}

type Action = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct FaultState {
    queued: BTreeMap<RemoteOp, VecDeque<Fault>>,
    actions: BTreeMap<RemoteOp, VecDeque<Action>>,
    calls: BTreeMap<RemoteOp, usize>,
}

/// A [`RemoteStore`] backed by a shared [`ZoneServer`].
pub struct FaultyRemote {
    server: Arc<ZoneServer>,
    state: Mutex<FaultState>,
    timeout: Mutex<Option<Duration>>,
}

impl FaultyRemote {
    /// Creates a remote over `server` with no faults queued.
    pub fn new(server: Arc<ZoneServer>) -> Self {
        Self {
            server,
            state: Mutex::new(FaultState::default()),
            timeout: Mutex::new(None),
        }
    }

    /// The shared server.
    pub fn server(&self) -> &Arc<ZoneServer> {
        &self.server
    }

    /// Queues a fault for the next call of `op`.
    pub fn fail_next(&self, op: RemoteOp, fault: Fault) {
        self.state
            .lock()
            .queued
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    /// Queues `count` faults for the next calls of `op`.
    pub fn fail_times(&self, op: RemoteOp, fault: Fault, count: usize) {
        for _ in 0..count {
            self.fail_next(op, fault.clone());
        }
    }

    /// Runs `action` just before the next call of `op`.
    pub fn before_next<F>(&self, op: RemoteOp, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.state
            .lock()
            .actions
            .entry(op)
            .or_default()
            .push_back(Box::new(action));
    }

    /// Drops every queued fault and action.
    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.queued.clear();
        state.actions.clear();
    }

    /// Number of calls of `op`, including failed ones.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// The timeout handed over by the coordinator.
    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout.lock()
    }

    fn enter(&self, op: RemoteOp) -> SyncResult<()> {
        let (action, fault) = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_insert(0) += 1;
            let action = state.actions.get_mut(&op).and_then(VecDeque::pop_front);
            let fault = state.queued.get_mut(&op).and_then(VecDeque::pop_front);
            (action, fault)
        };

        if let Some(action) = action {
            action();
        }
        match fault {
            Some(fault) => Err(fault.into_error()),
            None => Ok(()),
        }
    }
}

impl RemoteStore for FaultyRemote {
    fn configure_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = Some(timeout);
    }

    fn zone_exists(&self, zone: &ZoneId) -> SyncResult<bool> {
        self.enter(RemoteOp::ZoneExists)?;
        Ok(self.server.zone_exists(zone))
    }

    fn create_zone(&self, zone: &ZoneId) -> SyncResult<()> {
        self.enter(RemoteOp::CreateZone)?;
        self.server.create_zone(zone);
        Ok(())
    }

    fn subscription_exists(
        &self,
        zone: &ZoneId,
        subscription: &SubscriptionId,
    ) -> SyncResult<bool> {
        self.enter(RemoteOp::SubscriptionExists)?;
        Ok(self.server.subscription_exists(zone, subscription))
    }

    fn create_subscription(
        &self,
        zone: &ZoneId,
        subscription: &SubscriptionId,
    ) -> SyncResult<()> {
        self.enter(RemoteOp::CreateSubscription)?;
        self.server
            .create_subscription(zone, subscription)
            .map_err(server_error)
    }

    fn modify_records(&self, zone: &ZoneId, batch: &PushBatch) -> SyncResult<PushResult> {
        self.enter(RemoteOp::ModifyRecords)?;
        self.server.modify_records(zone, batch).map_err(server_error)
    }

    fn fetch_changes(
        &self,
        zone: &ZoneId,
        since: Option<&ServerCursor>,
        limit: usize,
    ) -> SyncResult<ChangesPage> {
        self.enter(RemoteOp::FetchChanges)?;
        self.server
            .fetch_changes(zone, since, limit)
            .map_err(server_error)
    }

    fn fetch_records(
        &self,
        zone: &ZoneId,
        ids: &[RecordId],
        fields: Option<&BTreeSet<String>>,
    ) -> SyncResult<Vec<Snapshot>> {
        self.enter(RemoteOp::FetchRecords)?;
        self.server
            .fetch_records(zone, ids, fields)
            .map_err(server_error)
    }
}
