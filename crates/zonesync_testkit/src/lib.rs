//! # zonesync Testkit
//!
//! Test utilities for zonesync.
//!
//! This crate provides:
//! - Devices synced against a shared in-memory server
//! - A remote adapter with injectable faults
//! - Crash injection at the end of a pass
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zonesync_testkit::prelude::*;
//!
//! let server = cloud();
//! let device = TestDevice::default_on(&server);
//! device.insert(folder("f1", "Inbox")).unwrap();
//! device.remote.fail_next(RemoteOp::ModifyRecords, Fault::Timeout);
//! assert!(device.sync().is_err());
//! assert!(device.sync().is_ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use remote::*;
