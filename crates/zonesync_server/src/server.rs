//! The reference remote.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::zone::ServerZone;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;
use zonesync_protocol::{
    ChangesPage, PushBatch, PushResult, RecordId, ServerCursor, Snapshot, SubscriptionId, ZoneId,
};

/// An in-memory remote holding record zones.
///
/// Every device that syncs against the same `ZoneServer` sees the same
/// zones, so tests can stand up several engines and let them exchange
/// changes. Saves use optimistic concurrency on change tags and every
/// zone keeps a change history that the feed pages through.
///
/// # Example
///
/// ```
/// use zonesync_server::{ServerConfig, ZoneServer};
/// use zonesync_protocol::{PushBatch, Snapshot, ZoneId};
///
/// let server = ZoneServer::new(ServerConfig::default());
/// let zone = ZoneId::new("Notes");
/// server.create_zone(&zone);
///
/// let mut batch = PushBatch::new();
/// batch.saves.push(Snapshot::new("f1", "Folder").with_field("name", "Inbox"));
/// let result = server.modify_records(&zone, &batch).unwrap();
/// assert_eq!(result.saved().count(), 1);
/// ```
pub struct ZoneServer {
    config: ServerConfig,
    zones: RwLock<BTreeMap<ZoneId, ServerZone>>,
    subscriptions: RwLock<HashSet<(ZoneId, SubscriptionId)>>,
}

impl ZoneServer {
    /// Creates a server with no zones.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            zones: RwLock::new(BTreeMap::new()),
            subscriptions: RwLock::new(HashSet::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns true if the zone exists.
    pub fn zone_exists(&self, zone: &ZoneId) -> bool {
        self.zones.read().contains_key(zone)
    }

    /// Creates a zone. Creating an existing zone is a no-op.
    pub fn create_zone(&self, zone: &ZoneId) {
        let mut zones = self.zones.write();
        if !zones.contains_key(zone) {
            debug!(zone = %zone, "creating zone");
            zones.insert(zone.clone(), ServerZone::new());
        }
    }

    /// Deletes a zone with its records, history and subscriptions.
    pub fn delete_zone(&self, zone: &ZoneId) -> bool {
        self.subscriptions.write().retain(|(z, _)| z != zone);
        self.zones.write().remove(zone).is_some()
    }

    /// Returns true if the subscription exists on the zone.
    pub fn subscription_exists(&self, zone: &ZoneId, subscription: &SubscriptionId) -> bool {
        self.subscriptions
            .read()
            .contains(&(zone.clone(), subscription.clone()))
    }

    /// Creates a change subscription on an existing zone.
    pub fn create_subscription(
        &self,
        zone: &ZoneId,
        subscription: &SubscriptionId,
    ) -> ServerResult<()> {
        if !self.zone_exists(zone) {
            return Err(ServerError::ZoneNotFound(zone.to_string()));
        }
        self.subscriptions
            .write()
            .insert((zone.clone(), subscription.clone()));
        Ok(())
    }

    /// Applies a batch of saves and deletes.
    ///
    /// Every record gets its own outcome; a stale save does not stop the
    /// rest of the batch.
    pub fn modify_records(&self, zone: &ZoneId, batch: &PushBatch) -> ServerResult<PushResult> {
        if batch.len() > self.config.max_batch_size {
            return Err(ServerError::InvalidRequest(format!(
                "batch of {} records exceeds the limit of {}",
                batch.len(),
                self.config.max_batch_size
            )));
        }

        let mut zones = self.zones.write();
        let state = zones
            .get_mut(zone)
            .ok_or_else(|| ServerError::ZoneNotFound(zone.to_string()))?;

        let mut result = PushResult::default();
        for save in &batch.saves {
            let outcome = state.save(save);
            result.outcomes.push((save.record_id.clone(), outcome));
        }
        for id in &batch.deletes {
            let outcome = state.delete(id);
            result.outcomes.push((id.clone(), outcome));
        }

        debug!(
            zone = %zone,
            saves = batch.saves.len(),
            deletes = batch.deletes.len(),
            stale = result.stale().count(),
            "modified records"
        );
        Ok(result)
    }

    /// Returns one page of the zone's change feed after `since`.
    ///
    /// The page size is the smaller of `limit` and the configured maximum.
    pub fn fetch_changes(
        &self,
        zone: &ZoneId,
        since: Option<&ServerCursor>,
        limit: usize,
    ) -> ServerResult<ChangesPage> {
        let limit = limit.clamp(1, self.config.max_page_size);
        let zones = self.zones.read();
        let state = zones
            .get(zone)
            .ok_or_else(|| ServerError::ZoneNotFound(zone.to_string()))?;
        state.changes_since(since, limit)
    }

    /// Returns the requested records that exist, projected to `fields`.
    pub fn fetch_records(
        &self,
        zone: &ZoneId,
        ids: &[RecordId],
        fields: Option<&BTreeSet<String>>,
    ) -> ServerResult<Vec<Snapshot>> {
        let zones = self.zones.read();
        let state = zones
            .get(zone)
            .ok_or_else(|| ServerError::ZoneNotFound(zone.to_string()))?;
        Ok(state.fetch(ids, fields))
    }

    /// Returns the stored record.
    pub fn record(&self, zone: &ZoneId, id: impl Into<RecordId>) -> Option<Snapshot> {
        let id = id.into();
        self.zones.read().get(zone)?.get(&id).cloned()
    }

    /// Returns the number of records in the zone.
    pub fn record_count(&self, zone: &ZoneId) -> usize {
        self.zones.read().get(zone).map_or(0, ServerZone::len)
    }

    /// Returns the cursor positioned after the zone's latest change.
    pub fn head(&self, zone: &ZoneId) -> Option<ServerCursor> {
        self.zones.read().get(zone).map(ServerZone::head)
    }
}

impl Default for ZoneServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonesync_protocol::RecordOutcome;

    fn zone() -> ZoneId {
        ZoneId::new("Notes")
    }

    fn server_with_zone() -> ZoneServer {
        let server = ZoneServer::default();
        server.create_zone(&zone());
        server
    }

    fn save_batch(records: Vec<Snapshot>) -> PushBatch {
        let mut batch = PushBatch::new();
        batch.saves = records;
        batch
    }

    #[test]
    fn zone_lifecycle() {
        let server = ZoneServer::default();
        assert!(!server.zone_exists(&zone()));

        server.create_zone(&zone());
        server.create_zone(&zone());
        assert!(server.zone_exists(&zone()));

        let sub = SubscriptionId::for_zone(&zone());
        server.create_subscription(&zone(), &sub).unwrap();
        assert!(server.subscription_exists(&zone(), &sub));

        assert!(server.delete_zone(&zone()));
        assert!(!server.subscription_exists(&zone(), &sub));
    }

    #[test]
    fn subscription_requires_zone() {
        let server = ZoneServer::default();
        let sub = SubscriptionId::for_zone(&zone());
        assert_eq!(
            server.create_subscription(&zone(), &sub),
            Err(ServerError::ZoneNotFound("Notes".into()))
        );
    }

    #[test]
    fn missing_zone_is_reported() {
        let server = ZoneServer::default();
        let err = server
            .modify_records(&zone(), &PushBatch::new())
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(server.fetch_changes(&zone(), None, 10).is_err());
        assert!(server.fetch_records(&zone(), &[], None).is_err());
    }

    #[test]
    fn batch_reports_each_record() {
        let server = server_with_zone();
        server
            .modify_records(
                &zone(),
                &save_batch(vec![Snapshot::new("f1", "Folder").with_field("name", "a")]),
            )
            .unwrap();

        let mut batch = save_batch(vec![
            Snapshot::new("f1", "Folder").with_field("name", "stale"),
            Snapshot::new("f2", "Folder").with_field("name", "fresh"),
        ]);
        batch.deletes.push(RecordId::new("gone"));
        let result = server.modify_records(&zone(), &batch).unwrap();

        assert_eq!(result.outcomes.len(), 3);
        assert_eq!(result.stale().collect::<Vec<_>>(), vec![&RecordId::new("f1")]);
        assert_eq!(result.saved().count(), 1);
        assert_eq!(result.outcomes[2].1, RecordOutcome::Deleted);
        assert_eq!(server.record_count(&zone()), 2);
    }

    #[test]
    fn oversized_batch_is_refused() {
        let server = ZoneServer::new(ServerConfig::new().with_max_batch_size(1));
        server.create_zone(&zone());

        let batch = save_batch(vec![Snapshot::new("a", "Folder"), Snapshot::new("b", "Folder")]);
        assert!(matches!(
            server.modify_records(&zone(), &batch),
            Err(ServerError::InvalidRequest(_))
        ));
        assert_eq!(server.record_count(&zone()), 0);
    }

    #[test]
    fn change_feed_honors_page_limit() {
        let server = ZoneServer::new(ServerConfig::new().with_max_page_size(2));
        server.create_zone(&zone());
        let records = (0..3)
            .map(|i| Snapshot::new(format!("f{i}"), "Folder"))
            .collect();
        server.modify_records(&zone(), &save_batch(records)).unwrap();

        let page = server.fetch_changes(&zone(), None, 50).unwrap();
        assert_eq!(page.changed.len(), 2);
        assert!(page.more_coming);

        let rest = server.fetch_changes(&zone(), Some(&page.cursor), 50).unwrap();
        assert_eq!(rest.changed.len(), 1);
        assert!(!rest.more_coming);
        assert_eq!(Some(rest.cursor), server.head(&zone()));
    }

    #[test]
    fn record_lookup() {
        let server = server_with_zone();
        server
            .modify_records(
                &zone(),
                &save_batch(vec![Snapshot::new("f1", "Folder").with_field("name", "a")]),
            )
            .unwrap();

        let stored = server.record(&zone(), "f1").unwrap();
        assert_eq!(stored.change_tag.as_deref(), Some("v1"));
        assert!(server.record(&zone(), "f2").is_none());
        assert!(server.record(&ZoneId::new("Other"), "f1").is_none());
    }
}
