//! # zonesync server
//!
//! In-memory reference remote for the zonesync engine.
//!
//! This crate provides:
//! - [`ZoneServer`]: record zones with change tags and a paged change feed
//! - [`ServerZone`]: the state of one zone
//! - [`ServerConfig`]: page and batch limits
//!
//! It stands in for a hosted record store in tests and demos. Several
//! engines can share one server to exchange changes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod server;
mod zone;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::ZoneServer;
pub use zone::{decode_cursor, encode_cursor, ServerZone, ZoneChange};
