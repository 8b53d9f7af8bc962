//! Run command - drives the synchronization service against the live APIs.

use std::sync::Arc;

use guardsync::{
    Notification, StaticToken, SyncConfig, SyncService, Topic,
    api::{HttpAdminApi, HttpClientApi, TokenSource},
};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::error::RecvError,
};

use crate::cli::RunArgs;

/// Load the config file if one was given, defaults otherwise.
pub fn load_config(path: Option<&std::path::Path>) -> Result<SyncConfig, guardsync::ConfigError> {
    match path {
        Some(path) => SyncConfig::from_file(path),
        None => Ok(SyncConfig::default()),
    }
}

fn log_notification(notification: &Notification) {
    let topic = notification.topic;
    let payload = &notification.payload;
    match topic {
        Topic::EmergencyIncident => tracing::warn!(%topic, %payload, "emergency"),
        Topic::SyncError => tracing::error!(%topic, %payload, "sync error"),
        _ => tracing::info!(%topic, %payload, "notification"),
    }
}

/// Run the synchronization service until SIGINT or SIGTERM
pub async fn run(args: &RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args.config.as_deref())?;

    let tokens: Arc<dyn TokenSource> = Arc::new(StaticToken::new(args.token.as_str()));
    let admin = HttpAdminApi::new(&args.admin_url, tokens.clone())?;
    let client = HttpClientApi::new(&args.client_url, tokens)?;

    let service = SyncService::builder(Arc::new(admin), Arc::new(client))
        .config(config)
        .build()?;
    let mut notifications = service.subscribe();
    service.start()?;

    println!(
        "Guardsync syncing {} <-> {} every {}s",
        args.admin_url,
        args.client_url,
        service.config().sync_interval_secs
    );
    println!("Press Ctrl+C to shutdown");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                break;
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown...");
                break;
            }
            received = notifications.recv() => match received {
                Ok(notification) => log_notification(&notification),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification log fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    service.stop().await?;
    let stats = service.get_sync_statistics();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("Service shut down");
    Ok(())
}
