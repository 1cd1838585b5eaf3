mod classifier;
mod config;
mod ledger;
mod persistence;
mod sync;
mod utils;

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::ledger::GatewayLedgerClient;
use crate::persistence::FileMirrorRepository;
use crate::sync::SyncEngine;
use crate::sync::events::{LogNotifier, NotificationDispatcher, WebhookNotifier};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::builder()
				.with_default_directive(tracing::Level::INFO.into())
				.from_env_lossy(),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let config_path = AppConfig::resolve_path(std::env::args().nth(1));
	let config = match AppConfig::load(&config_path).await {
		Ok(config) => config,
		Err(e) => {
			error!("Failed to load configuration: {}", e);
			return;
		}
	};
	info!(
		"Starting ledger mirror sync for network {} ({:?})",
		config.network_name, config_path
	);

	let repository = match FileMirrorRepository::open(config.data_dir.clone(), config.compact_every)
		.await
	{
		Ok(repository) => Arc::new(repository),
		Err(e) => {
			error!("Failed to open mirror in {:?}: {}", config.data_dir, e);
			return;
		}
	};

	let mut dispatcher =
		NotificationDispatcher::new(config.network_name.clone(), config.client_name.clone());
	dispatcher.register_handler(Arc::new(LogNotifier));
	if let Some(url) = &config.notifications.webhook_url {
		match WebhookNotifier::new(url.clone()) {
			Ok(webhook) => dispatcher.register_handler(Arc::new(webhook)),
			Err(e) => warn!("Webhook notifications disabled: {}", e),
		}
	}
	let notifier = Arc::new(dispatcher);

	loop {
		let engine = match build_engine(&config, repository.clone(), notifier.clone()).await {
			Ok(engine) => Some(engine),
			Err(e) => {
				error!("Failed to start sync engine: {}", e);
				None
			}
		};

		let stop = tokio::select! {
			_ = tokio::time::sleep(config.sync.rebuild_interval) => false,
			_ = tokio::signal::ctrl_c() => true,
		};

		if let Some(engine) = engine {
			info!(
				"Tearing down sync engine ({} deferred tasks pending)",
				engine.pending_tasks()
			);
			engine.destroy();
		}
		if stop {
			info!("Shutting down");
			return;
		}
	}
}

/// Build a fresh gateway client and an engine around it.
async fn build_engine(
	config: &AppConfig,
	repository: Arc<FileMirrorRepository>,
	notifier: Arc<NotificationDispatcher>,
) -> Result<SyncEngine, Box<dyn std::error::Error>> {
	let client = GatewayLedgerClient::new(config.client_name.clone(), &config.gateway)?;
	client.initialize().await?;

	let engine = SyncEngine::start(config, Arc::new(client), repository, notifier).await?;
	Ok(engine)
}
