//! Conflict policy and conflict records.

use crate::record::{RecordId, Snapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A record the remote refused because its change tag was stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    /// What the client tried to save.
    pub client: Snapshot,
    /// What the server currently holds, `None` if the record is gone.
    pub server: Option<Snapshot>,
}

impl ConflictRecord {
    /// Creates a conflict record.
    pub fn new(client: Snapshot, server: Option<Snapshot>) -> Self {
        Self { client, server }
    }

    /// Identity of the conflicted record.
    pub fn record_id(&self) -> &RecordId {
        &self.client.record_id
    }

    /// Returns true if the server no longer has the record.
    pub fn is_server_deleted(&self) -> bool {
        self.server.is_none()
    }
}

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Server copy always wins.
    #[default]
    ServerWins,
    /// Client copy always wins.
    ClientWins,
    /// A caller-supplied callback picks the winner.
    CallerDecides,
}

impl ConflictPolicy {
    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictPolicy::ServerWins => 1,
            ConflictPolicy::ClientWins => 2,
            ConflictPolicy::CallerDecides => 3,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictPolicy::ServerWins),
            2 => Some(ConflictPolicy::ClientWins),
            3 => Some(ConflictPolicy::CallerDecides),
            _ => None,
        }
    }

    /// Kebab-case name, as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::ServerWins => "server-wins",
            ConflictPolicy::ClientWins => "client-wins",
            ConflictPolicy::CallerDecides => "caller-decides",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server-wins" => Ok(ConflictPolicy::ServerWins),
            "client-wins" => Ok(ConflictPolicy::ClientWins),
            "caller-decides" => Ok(ConflictPolicy::CallerDecides),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_server_wins() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::ServerWins);
    }

    #[test]
    fn policy_codes() {
        for policy in [
            ConflictPolicy::ServerWins,
            ConflictPolicy::ClientWins,
            ConflictPolicy::CallerDecides,
        ] {
            assert_eq!(ConflictPolicy::from_code(policy.to_code()), Some(policy));
            assert_eq!(policy.as_str().parse::<ConflictPolicy>(), Ok(policy));
        }
        assert_eq!(ConflictPolicy::from_code(0), None);
        assert!("last-write-wins".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn conflict_record_accessors() {
        let record = ConflictRecord::new(Snapshot::new("a", "Stop"), None);
        assert_eq!(record.record_id(), &RecordId::new("a"));
        assert!(record.is_server_deleted());
    }
}
