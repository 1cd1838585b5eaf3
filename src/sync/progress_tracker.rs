//! Progress tracking for channel backfill.
//!
//! This module provides the `BackfillProgressTracker`, which follows one backfill pass over a
//! channel's missing blocks. It counts ingested blocks and transactions, remembers the blocks that
//! could not be ingested, and logs progress at regular intervals.

use std::collections::BTreeSet;
use tracing::{info, warn};

/// Service for tracking the progress of one backfill pass
#[derive(Debug, Clone)]
pub struct BackfillProgressTracker {
    channel: String,
    /// Block numbers the pass set out to ingest
    missing: BTreeSet<u64>,
    /// Block numbers ingested so far
    ingested: BTreeSet<u64>,
    /// Block numbers stored by someone else while the pass ran
    already_present: usize,
    transactions_ingested: usize,
    /// Block numbers whose fetch or ingestion failed
    failed: BTreeSet<u64>,
    /// Number of handled blocks at the last progress log
    last_logged: usize,
}

impl BackfillProgressTracker {
    pub fn new(channel: &str, missing: &[u64]) -> Self {
        Self {
            channel: channel.to_string(),
            missing: missing.iter().copied().collect(),
            ingested: BTreeSet::new(),
            already_present: 0,
            transactions_ingested: 0,
            failed: BTreeSet::new(),
            last_logged: 0,
        }
    }

    /// Record a block persisted by this pass
    pub fn record_ingested(&mut self, number: u64, txcount: usize) {
        self.ingested.insert(number);
        self.transactions_ingested += txcount;
    }

    /// Record a block that turned out to be stored already
    pub fn record_already_present(&mut self, number: u64) {
        self.ingested.insert(number);
        self.already_present += 1;
    }

    pub fn record_failure(&mut self, number: u64) {
        self.failed.insert(number);
    }

    fn handled(&self) -> usize {
        self.ingested.len() + self.failed.len()
    }

    /// Log progress every 1000 blocks or when forced
    pub fn log_progress(&mut self, force: bool) {
        let handled = self.handled();
        let should_log = force || handled.saturating_sub(self.last_logged) >= 1000;

        if should_log && handled > 0 {
            info!(
                "Backfill progress for {}: {}/{} blocks, {} transactions",
                self.channel,
                handled,
                self.missing.len(),
                self.transactions_ingested
            );
            self.last_logged = handled;
        }
    }

    /// Blocks the pass set out to ingest and did not.
    pub fn remaining(&self) -> Vec<u64> {
        self.missing.difference(&self.ingested).copied().collect()
    }

    pub fn get_stats(&self) -> BackfillStats {
        let remaining = self.remaining();
        if !self.failed.is_empty() {
            warn!(
                "Backfill of {} left {} blocks behind, first {:?}",
                self.channel,
                remaining.len(),
                remaining.first()
            );
        }

        BackfillStats {
            channel: self.channel.clone(),
            first_missing: self.missing.first().copied(),
            last_missing: self.missing.last().copied(),
            blocks_missing: self.missing.len(),
            blocks_ingested: self.ingested.len() - self.already_present,
            already_present: self.already_present,
            transactions_ingested: self.transactions_ingested,
            failed: self.failed.iter().copied().collect(),
        }
    }
}

/// Statistics about one backfill pass
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillStats {
    pub channel: String,
    pub first_missing: Option<u64>,
    pub last_missing: Option<u64>,
    pub blocks_missing: usize,
    pub blocks_ingested: usize,
    pub already_present: usize,
    pub transactions_ingested: usize,
    pub failed: Vec<u64>,
}

impl BackfillStats {
    /// Get a human-readable summary of the backfill statistics
    pub fn summary(&self) -> String {
        let range = match (self.first_missing, self.last_missing) {
            (Some(first), Some(last)) => format!("blocks {} to {}", first, last),
            _ => "no blocks".to_string(),
        };
        format!(
            "Backfill of {} over {}: {} of {} blocks ingested, {} transactions{}",
            self.channel,
            range,
            self.blocks_ingested,
            self.blocks_missing,
            self.transactions_ingested,
            if self.failed.is_empty() {
                String::new()
            } else {
                format!(" ({} failed)", self.failed.len())
            }
        )
    }
}
