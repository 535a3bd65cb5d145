//! Remote backing store collaborator.

use crate::error::SyncResult;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use zonesync_protocol::{
    ChangesPage, PushBatch, PushResult, RecordId, RecordOutcome, ServerCursor, Snapshot,
    SubscriptionId, ZoneId,
};

/// The remote backing store.
///
/// Every call blocks until the remote answered or the configured timeout
/// elapsed, in which case it returns [`crate::SyncError::Timeout`].
pub trait RemoteStore: Send + Sync {
    /// Hands the per-call timeout to the implementation.
    fn configure_timeout(&self, _timeout: Duration) {}

    /// Returns true if the zone exists.
    fn zone_exists(&self, zone: &ZoneId) -> SyncResult<bool>;

    /// Creates the zone.
    fn create_zone(&self, zone: &ZoneId) -> SyncResult<()>;

    /// Returns true if the subscription exists.
    fn subscription_exists(&self, zone: &ZoneId, subscription: &SubscriptionId)
        -> SyncResult<bool>;

    /// Creates a change subscription on the zone.
    fn create_subscription(&self, zone: &ZoneId, subscription: &SubscriptionId)
        -> SyncResult<()>;

    /// Saves and deletes records, reporting one outcome per record.
    fn modify_records(&self, zone: &ZoneId, batch: &PushBatch) -> SyncResult<PushResult>;

    /// Returns changes since `since` (everything if `None`), at most `limit`.
    fn fetch_changes(
        &self,
        zone: &ZoneId,
        since: Option<&ServerCursor>,
        limit: usize,
    ) -> SyncResult<ChangesPage>;

    /// Fetches records by ID, restricted to `fields` if given.
    ///
    /// Records that do not exist are omitted from the result.
    fn fetch_records(
        &self,
        zone: &ZoneId,
        ids: &[RecordId],
        fields: Option<&BTreeSet<String>>,
    ) -> SyncResult<Vec<Snapshot>>;
}

/// Scripted remote for unit tests.
///
/// Each call pops the next scripted response for its method; when none is
/// queued a benign default is returned: zones and subscriptions exist, every
/// save is accepted with a fresh `mock-<n>` tag, the change feed is empty and
/// record fetches find nothing.
#[derive(Debug, Default)]
pub struct MockRemoteStore {
    zone_exists: Mutex<VecDeque<SyncResult<bool>>>,
    create_zone: Mutex<VecDeque<SyncResult<()>>>,
    subscription_exists: Mutex<VecDeque<SyncResult<bool>>>,
    create_subscription: Mutex<VecDeque<SyncResult<()>>>,
    modify_records: Mutex<VecDeque<SyncResult<PushResult>>>,
    fetch_changes: Mutex<VecDeque<SyncResult<ChangesPage>>>,
    fetch_records: Mutex<VecDeque<SyncResult<Vec<Snapshot>>>>,
    calls: Mutex<Vec<String>>,
    pushes: Mutex<Vec<PushBatch>>,
    fetched_since: Mutex<Vec<Option<ServerCursor>>>,
    fetched_fields: Mutex<Vec<Option<BTreeSet<String>>>>,
    timeout: Mutex<Option<Duration>>,
    tag_counter: Mutex<u64>,
}

impl MockRemoteStore {
    /// Creates a mock with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a `zone_exists` response.
    pub fn push_zone_exists(&self, response: SyncResult<bool>) {
        self.zone_exists.lock().push_back(response);
    }

    /// Queues a `create_zone` response.
    pub fn push_create_zone(&self, response: SyncResult<()>) {
        self.create_zone.lock().push_back(response);
    }

    /// Queues a `subscription_exists` response.
    pub fn push_subscription_exists(&self, response: SyncResult<bool>) {
        self.subscription_exists.lock().push_back(response);
    }

    /// Queues a `create_subscription` response.
    pub fn push_create_subscription(&self, response: SyncResult<()>) {
        self.create_subscription.lock().push_back(response);
    }

    /// Queues a `modify_records` response.
    pub fn push_modify_records(&self, response: SyncResult<PushResult>) {
        self.modify_records.lock().push_back(response);
    }

    /// Queues a `fetch_changes` response.
    pub fn push_fetch_changes(&self, response: SyncResult<ChangesPage>) {
        self.fetch_changes.lock().push_back(response);
    }

    /// Queues a `fetch_records` response.
    pub fn push_fetch_records(&self, response: SyncResult<Vec<Snapshot>>) {
        self.fetch_records.lock().push_back(response);
    }

    /// Names of the methods called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls to the named method.
    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == method).count()
    }

    /// Every batch submitted through `modify_records`.
    pub fn pushes(&self) -> Vec<PushBatch> {
        self.pushes.lock().clone()
    }

    /// The `since` cursor of every `fetch_changes` call.
    pub fn fetched_since(&self) -> Vec<Option<ServerCursor>> {
        self.fetched_since.lock().clone()
    }

    /// The field restriction of every `fetch_records` call.
    pub fn fetched_fields(&self) -> Vec<Option<BTreeSet<String>>> {
        self.fetched_fields.lock().clone()
    }

    /// The timeout handed over by the coordinator.
    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout.lock()
    }

    fn record_call(&self, method: &str) {
        self.calls.lock().push(method.to_string());
    }

    fn accept_all(&self, batch: &PushBatch) -> PushResult {
        let mut counter = self.tag_counter.lock();
        let mut outcomes = Vec::with_capacity(batch.len());
        for save in &batch.saves {
            *counter += 1;
            let mut stored = save.clone();
            stored.change_tag = Some(format!("mock-{}", *counter));
            outcomes.push((save.record_id.clone(), RecordOutcome::Saved(stored)));
        }
        for id in &batch.deletes {
            outcomes.push((id.clone(), RecordOutcome::Deleted));
        }
        PushResult { outcomes }
    }
}

impl RemoteStore for MockRemoteStore {
    fn configure_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = Some(timeout);
    }

    fn zone_exists(&self, _zone: &ZoneId) -> SyncResult<bool> {
        self.record_call("zone_exists");
        self.zone_exists.lock().pop_front().unwrap_or(Ok(true))
    }

    fn create_zone(&self, _zone: &ZoneId) -> SyncResult<()> {
        self.record_call("create_zone");
        self.create_zone.lock().pop_front().unwrap_or(Ok(()))
    }

    fn subscription_exists(
        &self,
        _zone: &ZoneId,
        _subscription: &SubscriptionId,
    ) -> SyncResult<bool> {
        self.record_call("subscription_exists");
        self.subscription_exists.lock().pop_front().unwrap_or(Ok(true))
    }

    fn create_subscription(
        &self,
        _zone: &ZoneId,
        _subscription: &SubscriptionId,
    ) -> SyncResult<()> {
        self.record_call("create_subscription");
        self.create_subscription.lock().pop_front().unwrap_or(Ok(()))
    }

    fn modify_records(&self, _zone: &ZoneId, batch: &PushBatch) -> SyncResult<PushResult> {
        self.record_call("modify_records");
        self.pushes.lock().push(batch.clone());
        let scripted = self.modify_records.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(self.accept_all(batch)))
    }

    fn fetch_changes(
        &self,
        _zone: &ZoneId,
        since: Option<&ServerCursor>,
        _limit: usize,
    ) -> SyncResult<ChangesPage> {
        self.record_call("fetch_changes");
        self.fetched_since.lock().push(since.cloned());
        let scripted = self.fetch_changes.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ChangesPage {
                changed: Vec::new(),
                deleted: Vec::new(),
                more_coming: false,
                cursor: since
                    .cloned()
                    .unwrap_or_else(|| ServerCursor::from_bytes(Vec::new())),
            })
        })
    }

    fn fetch_records(
        &self,
        _zone: &ZoneId,
        _ids: &[RecordId],
        fields: Option<&BTreeSet<String>>,
    ) -> SyncResult<Vec<Snapshot>> {
        self.record_call("fetch_records");
        self.fetched_fields.lock().push(fields.cloned());
        self.fetch_records.lock().pop_front().unwrap_or(Ok(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[test]
    fn mock_defaults_accept_everything() {
        let remote = MockRemoteStore::new();
        let zone = ZoneId::new("Routes");

        assert!(remote.zone_exists(&zone).unwrap());

        let batch = PushBatch {
            saves: vec![Snapshot::new("a", "Stop")],
            deletes: vec![RecordId::new("b")],
        };
        let result = remote.modify_records(&zone, &batch).unwrap();
        assert_eq!(result.saved().count(), 1);
        assert_eq!(
            result.saved().next().unwrap().change_tag.as_deref(),
            Some("mock-1")
        );

        let page = remote.fetch_changes(&zone, None, 50).unwrap();
        assert!(!page.more_coming);
        assert!(page.changed.is_empty());

        assert_eq!(
            remote.calls(),
            vec!["zone_exists", "modify_records", "fetch_changes"]
        );
        assert_eq!(remote.pushes().len(), 1);
    }

    #[test]
    fn scripted_responses_are_consumed_in_order() {
        let remote = MockRemoteStore::new();
        let zone = ZoneId::new("Routes");
        remote.push_zone_exists(Ok(false));
        remote.push_zone_exists(Err(SyncError::Timeout));

        assert!(!remote.zone_exists(&zone).unwrap());
        assert!(matches!(remote.zone_exists(&zone), Err(SyncError::Timeout)));
        assert!(remote.zone_exists(&zone).unwrap());
        assert_eq!(remote.call_count("zone_exists"), 3);
    }
}
