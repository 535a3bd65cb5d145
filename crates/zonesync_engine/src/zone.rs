//! Remote zone bootstrap.

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zonesync_protocol::{SubscriptionId, ZoneId};

/// A named partition of the remote store plus its change subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteZone {
    zone_id: ZoneId,
    subscription_id: SubscriptionId,
}

impl RemoteZone {
    /// Creates the zone descriptor for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let zone_id = ZoneId::new(name);
        let subscription_id = SubscriptionId::for_zone(&zone_id);
        Self {
            zone_id,
            subscription_id,
        }
    }

    /// Creates a descriptor with a fresh random zone name.
    pub fn generate() -> Self {
        Self::new(format!("zonesync-zone-{}", Uuid::new_v4()))
    }

    /// Zone identifier.
    pub fn zone_id(&self) -> &ZoneId {
        &self.zone_id
    }

    /// Subscription identifier, derived from the zone name.
    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// Creates the zone and then its subscription if either is missing.
    ///
    /// A failed existence check is logged and treated as "absent". The
    /// subscription is not attempted when the zone could not be created.
    pub fn ensure_exists<R: RemoteStore + ?Sized>(&self, remote: &R) -> SyncResult<()> {
        let zone_exists = remote.zone_exists(&self.zone_id).unwrap_or_else(|e| {
            warn!(zone = %self.zone_id, error = %e, "zone existence check failed");
            false
        });

        if zone_exists {
            debug!(zone = %self.zone_id, "zone exists");
        } else {
            remote
                .create_zone(&self.zone_id)
                .map_err(|e| SyncError::ZoneCreationFailed {
                    zone: self.zone_id.to_string(),
                    message: e.to_string(),
                })?;
            info!(zone = %self.zone_id, "created zone");
        }

        let subscription_exists = remote
            .subscription_exists(&self.zone_id, &self.subscription_id)
            .unwrap_or_else(|e| {
                warn!(
                    subscription = %self.subscription_id,
                    error = %e,
                    "subscription existence check failed"
                );
                false
            });

        if !subscription_exists {
            remote
                .create_subscription(&self.zone_id, &self.subscription_id)
                .map_err(|e| SyncError::ZoneSubscriptionCreationFailed {
                    subscription: self.subscription_id.to_string(),
                    message: e.to_string(),
                })?;
            info!(subscription = %self.subscription_id, "created subscription");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemoteStore;

    #[test]
    fn subscription_name_is_deterministic() {
        let zone = RemoteZone::new("Routes");
        assert_eq!(zone.zone_id().as_str(), "Routes");
        assert_eq!(zone.subscription_id().as_str(), "Routes-subscription");
        assert_eq!(zone, RemoteZone::new("Routes"));
    }

    #[test]
    fn generated_zones_are_unique() {
        let a = RemoteZone::generate();
        let b = RemoteZone::generate();
        assert!(a.zone_id().as_str().starts_with("zonesync-zone-"));
        assert_ne!(a.zone_id(), b.zone_id());
    }

    #[test]
    fn existing_zone_is_left_alone() {
        let remote = MockRemoteStore::new();
        RemoteZone::new("Routes").ensure_exists(&remote).unwrap();
        assert_eq!(remote.calls(), vec!["zone_exists", "subscription_exists"]);
    }

    #[test]
    fn failed_check_is_treated_as_absent() {
        let remote = MockRemoteStore::new();
        remote.push_zone_exists(Err(SyncError::Timeout));
        remote.push_subscription_exists(Ok(false));

        RemoteZone::new("Routes").ensure_exists(&remote).unwrap();
        assert_eq!(remote.call_count("create_zone"), 1);
        assert_eq!(remote.call_count("create_subscription"), 1);
    }

    #[test]
    fn zone_failure_skips_subscription() {
        let remote = MockRemoteStore::new();
        remote.push_zone_exists(Ok(false));
        remote.push_create_zone(Err(SyncError::remote_fatal("not allowed")));

        let err = RemoteZone::new("Routes").ensure_exists(&remote).unwrap_err();
        assert!(matches!(err, SyncError::ZoneCreationFailed { .. }));
        assert_eq!(remote.call_count("subscription_exists"), 0);
        assert_eq!(remote.call_count("create_subscription"), 0);
    }

    #[test]
    fn subscription_failure_is_reported() {
        let remote = MockRemoteStore::new();
        remote.push_subscription_exists(Ok(false));
        remote.push_create_subscription(Err(SyncError::remote_fatal("denied")));

        let err = RemoteZone::new("Routes").ensure_exists(&remote).unwrap_err();
        match err {
            SyncError::ZoneSubscriptionCreationFailed { subscription, message } => {
                assert_eq!(subscription, "Routes-subscription");
                assert!(message.contains("denied"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
