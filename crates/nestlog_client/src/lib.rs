//! # Nestlog Client Core
//!
//! Client-side reliability engine for nestlog sync.
//!
//! This crate provides:
//! - Durable cursor and pending-queue persistence across restarts
//! - The produce/ack/flush loop that makes offline writes safe
//! - Cursor-driven catch-up with `has_more` pipelining
//! - Reconnect backoff policy
//!
//! The core is synchronous and transport-agnostic: the embedder supplies a
//! [`FrameSink`] for the outbound half of the connection and feeds inbound
//! frames to [`SyncClient::handle_frame`], so the reliability logic is
//! testable without a network.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod state;
mod storage;
mod transport;

pub use config::ReconnectPolicy;
pub use error::{ClientError, ClientResult};
pub use state::{ConnectionStatus, PendingItem, SyncClient};
pub use storage::{DeviceStore, FileDeviceStore, MemoryDeviceStore};
pub use transport::{FrameSink, MockSink};
