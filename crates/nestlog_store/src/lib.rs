//! # Nestlog Record Store
//!
//! Durable SQLite-backed storage for nestlog.
//!
//! This crate provides:
//! - The per-family ordered entry log with soft deletes and
//!   server-assigned sequence numbers
//! - Cursor range scans for incremental sync
//! - Families, access links, configs and operator accounts
//! - Idempotent versioned schema migrations
//!
//! All access goes through one serialized connection; every mutation of an
//! entry bumps its family's sequence inside the same transaction, which is
//! what gives external observers a strict per-family total order.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod migrations;
pub mod password;
mod store;

pub use error::{StoreError, StoreResult};
pub use store::{generate_token, AccessLink, Admin, Family, FamilyStats, RecordStore};
