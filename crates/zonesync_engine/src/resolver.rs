//! Conflict resolution.
//!
//! Resolution is a pure function of the conflicting snapshots and the
//! policy: it never touches the network or the local store.

use crate::config::{ConflictCallback, SyncConfig};
use std::fmt;
use tracing::warn;
use zonesync_protocol::{ConflictPolicy, ConflictRecord, Snapshot};

/// What to do with a conflicted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Push this snapshot in the retry.
    Push(Snapshot),
    /// Drop the save and delete the record locally.
    DeleteLocal,
}

/// Applies a [`ConflictPolicy`] to conflict records.
#[derive(Clone, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    callback: Option<ConflictCallback>,
}

impl ConflictResolver {
    /// Creates a resolver for `policy`.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            callback: None,
        }
    }

    /// Creates a resolver from the sync configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            policy: config.conflict_policy,
            callback: config.conflict_callback.clone(),
        }
    }

    /// Sets the callback used by [`ConflictPolicy::CallerDecides`].
    pub fn with_callback(mut self, callback: ConflictCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Configured policy.
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Resolves one conflict.
    pub fn resolve(&self, record: &ConflictRecord) -> Resolution {
        let Some(server) = &record.server else {
            return self.resolve_server_deleted(&record.client);
        };

        match self.policy {
            ConflictPolicy::ServerWins => Resolution::Push(server.clone()),
            ConflictPolicy::ClientWins => Resolution::Push(server.overlay(&record.client)),
            ConflictPolicy::CallerDecides => match &self.callback {
                Some(callback) => {
                    let mut winner = callback(&record.client, server);
                    winner.change_tag = server.change_tag.clone();
                    Resolution::Push(winner)
                }
                None => {
                    warn!(
                        record = %record.record_id(),
                        "no conflict callback configured, keeping server copy"
                    );
                    Resolution::Push(server.clone())
                }
            },
        }
    }

    fn resolve_server_deleted(&self, client: &Snapshot) -> Resolution {
        match self.policy {
            ConflictPolicy::ClientWins => {
                let mut recreated = client.clone();
                recreated.change_tag = None;
                Resolution::Push(recreated)
            }
            ConflictPolicy::ServerWins | ConflictPolicy::CallerDecides => Resolution::DeleteLocal,
        }
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("policy", &self.policy)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use zonesync_protocol::FieldValue;

    fn conflict() -> ConflictRecord {
        let client = Snapshot::new("a", "Stop")
            .with_field("name", "Main St")
            .with_modified_at(10)
            .with_change_tag("v1");
        let server = Snapshot::new("a", "Stop")
            .with_field("name", "Main Street")
            .with_field("status", "closed")
            .with_modified_at(20)
            .with_change_tag("v2");
        ConflictRecord::new(client, Some(server))
    }

    #[test]
    fn server_wins_keeps_server_copy() {
        let record = conflict();
        let resolution = ConflictResolver::new(ConflictPolicy::ServerWins).resolve(&record);
        assert_eq!(resolution, Resolution::Push(record.server.clone().unwrap()));
    }

    #[test]
    fn client_wins_lays_client_over_server() {
        let resolution = ConflictResolver::new(ConflictPolicy::ClientWins).resolve(&conflict());
        let Resolution::Push(winner) = resolution else {
            panic!("expected a push");
        };
        assert_eq!(winner.get("name"), Some(&FieldValue::from("Main St")));
        assert_eq!(winner.get("status"), Some(&FieldValue::from("closed")));
        assert_eq!(winner.change_tag.as_deref(), Some("v2"));
    }

    #[test]
    fn caller_decides_adopts_server_tag() {
        let resolver = ConflictResolver::new(ConflictPolicy::CallerDecides).with_callback(
            Arc::new(|client: &Snapshot, _server: &Snapshot| {
                client.clone().with_field("status", "merged")
            }),
        );

        let Resolution::Push(winner) = resolver.resolve(&conflict()) else {
            panic!("expected a push");
        };
        assert_eq!(winner.get("status"), Some(&FieldValue::from("merged")));
        assert_eq!(winner.change_tag.as_deref(), Some("v2"));
    }

    #[test]
    fn caller_decides_without_callback_falls_back_to_server() {
        let record = conflict();
        let resolution = ConflictResolver::new(ConflictPolicy::CallerDecides).resolve(&record);
        assert_eq!(resolution, Resolution::Push(record.server.unwrap()));
    }

    #[test]
    fn server_deleted_record() {
        let record = ConflictRecord::new(conflict().client, None);

        assert_eq!(
            ConflictResolver::new(ConflictPolicy::ServerWins).resolve(&record),
            Resolution::DeleteLocal
        );
        assert_eq!(
            ConflictResolver::new(ConflictPolicy::CallerDecides).resolve(&record),
            Resolution::DeleteLocal
        );

        let Resolution::Push(recreated) =
            ConflictResolver::new(ConflictPolicy::ClientWins).resolve(&record)
        else {
            panic!("expected a push");
        };
        assert_eq!(recreated.change_tag, None);
        assert_eq!(recreated.get("name"), Some(&FieldValue::from("Main St")));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn snapshot(name: String, status: String, at: u64, tag: String) -> Snapshot {
            Snapshot::new("r", "Stop")
                .with_field("name", name)
                .with_field("status", status)
                .with_modified_at(at)
                .with_change_tag(tag)
        }

        fn policy() -> impl Strategy<Value = ConflictPolicy> {
            prop_oneof![
                Just(ConflictPolicy::ServerWins),
                Just(ConflictPolicy::ClientWins),
                Just(ConflictPolicy::CallerDecides),
            ]
        }

        proptest! {
            #[test]
            fn resolution_is_a_pure_function(
                client_name in "[a-z]{1,8}",
                server_name in "[a-z]{1,8}",
                status in "[a-z]{1,8}",
                at in 0u64..1_000,
                server_present in any::<bool>(),
                policy in policy(),
            ) {
                let client = snapshot(client_name, status.clone(), at, "v1".into());
                let server = server_present
                    .then(|| snapshot(server_name, status, at + 1, "v2".into()));
                let record = ConflictRecord::new(client, server);

                let resolver = ConflictResolver::new(policy);
                let first = resolver.resolve(&record);
                let second = resolver.resolve(&record.clone());
                prop_assert_eq!(first, second);
            }
        }
    }
}
