//! Channel Synchronization Module
//!
//! This module keeps the relational mirror consistent with the ledger for one network/client pair.
//! It is composed of several submodules:
//!
//! - `engine`: Wires all services together, mirrors the network configuration and runs the periodic driver.
//! - `coordinator`: Owns the per-channel block-event subscriptions and their connection state.
//! - `block_pipeline`: Ingests one block into channel, block and transaction rows.
//! - `backfill`: Closes gaps between the ledger height and the stored blocks.
//! - `discovery`: Writes channel rows and mirrors peers, orderers and chaincodes.
//! - `transaction_decoder`: Turns envelopes into transaction rows.
//! - `events`: Notification types, sinks and the dispatcher.
//!
//! Push delivery and backfill both route blocks through the same pipeline. In-flight guards keep a
//! block or a channel's backfill from being processed twice at once, and the repository ignores
//! duplicate saves, so every path is safe to repeat.

/// Gap-closing backfill of missing blocks
pub mod backfill;
/// Block ingestion into the mirror
pub mod block_pipeline;
/// Per-channel subscription state machine
pub mod coordinator;
/// Topology discovery reconciliation
pub mod discovery;
/// Engine wiring and periodic driver
pub mod engine;
/// Notification system for channel and block events
pub mod events;
/// Mutual exclusion for blocks and backfills in progress
pub mod in_flight;
/// Tracks backfill progress and statistics
pub mod progress_tracker;
/// Delayed side effects
pub mod scheduler;
/// Envelope decoding into transaction rows
pub mod transaction_decoder;
/// Sync error types
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::SyncEngine;
