//! Deferred side effects.
//!
//! Channel initialization, topology refresh and chaincode refresh run a fixed delay after the
//! block that triggered them, so the ledger has settled before it is queried. They are submitted
//! here as named tasks instead of bare timers; the delay source is a `Clock`.

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Source of delays.
#[async_trait]
pub trait Clock: Send + Sync {
	async fn sleep(&self, duration: Duration);
}

/// Clock backed by the Tokio timer; honours paused time in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
	async fn sleep(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}
}

/// Runs submitted tasks after a delay. Pending tasks are aborted when the scheduler is dropped.
pub struct DeferredScheduler {
	clock: Arc<dyn Clock>,
	tasks: Mutex<JoinSet<()>>,
}

impl DeferredScheduler {
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self {
			clock,
			tasks: Mutex::new(JoinSet::new()),
		}
	}

	/// Run `task` once `delay` has elapsed.
	pub fn schedule<F>(&self, name: impl Into<String>, delay: Duration, task: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let name = name.into();
		let clock = self.clock.clone();
		debug!("Scheduling {} in {:?}", name, delay);

		let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		// Reap finished tasks so the set does not grow with the engine's lifetime.
		while let Some(result) = tasks.try_join_next() {
			if let Err(e) = result {
				warn!("Deferred task failed: {}", e);
			}
		}
		tasks.spawn(async move {
			clock.sleep(delay).await;
			debug!("Running deferred {}", name);
			task.await;
		});
	}

	/// Number of submitted tasks that have not been reaped.
	pub fn pending(&self) -> usize {
		self.tasks
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.len()
	}

	/// Wait until every submitted task, including tasks submitted meanwhile, has finished.
	pub async fn wait_idle(&self) {
		loop {
			let mut running = {
				let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
				std::mem::take(&mut *tasks)
			};
			if running.is_empty() {
				return;
			}
			while let Some(result) = running.join_next().await {
				if let Err(e) = result {
					warn!("Deferred task failed: {}", e);
				}
			}
		}
	}
}
