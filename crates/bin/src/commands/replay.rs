//! Replay command - runs a fixture of events through the engine offline.
//!
//! A fixture is a JSON document:
//!
//! ```json
//! {
//!   "admin":  [ { "id": "P1", "name": "Depot", "version": 3, "lastModified": "..." } ],
//!   "client": [ { "propertyId": "P1", "images": [], "lastModified": "..." } ],
//!   "events": [ { "event": { "id": "e1", "type": "property_updated", ... } } ]
//! }
//! ```
//!
//! Events without a `context` are processed as their own user with a
//! non-expiring token.

use std::{path::Path, sync::Arc};

use guardsync::{
    AuthToken, EventHandlerResult, HandlerContext, InMemoryAdminApi, InMemoryClientApi,
    Notification, SyncEvent, SyncService,
    model::{ClientPropertyData, PropertySyncData},
    service::CycleReport,
};
use serde::Deserialize;
use serde_json::json;

use super::run::load_config;
use crate::cli::ReplayArgs;
use crate::output::{OutputFormat, print_table};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Fixture {
    admin: Vec<PropertySyncData>,
    client: Vec<ClientPropertyData>,
    events: Vec<FixtureEvent>,
}

#[derive(Debug, Deserialize)]
struct FixtureEvent {
    event: SyncEvent,
    #[serde(default)]
    context: Option<HandlerContext>,
}

fn load_fixture(path: &Path) -> Result<Fixture, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read fixture {}: {e}", path.display()))?;
    let fixture = serde_json::from_str(&contents)
        .map_err(|e| format!("failed to parse fixture {}: {e}", path.display()))?;
    Ok(fixture)
}

/// Everything a replay produced.
struct Replay {
    results: Vec<EventHandlerResult>,
    cycles: Vec<CycleReport>,
    notifications: Vec<Notification>,
}

async fn replay(service: &SyncService, fixture: Fixture, reconcile: bool) -> Replay {
    let mut rx = service.subscribe();

    for FixtureEvent { event, context } in fixture.events {
        let context = context
            .unwrap_or_else(|| HandlerContext::for_event(&event, AuthToken::new("replay")));
        service.queue_sync_event(event, context);
    }
    let results = service.process_pending_events().await;
    let cycles = if reconcile {
        service.perform_synchronization().await.reports().to_vec()
    } else {
        Vec::new()
    };

    let mut notifications = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        notifications.push(notification);
    }
    Replay {
        results,
        cycles,
        notifications,
    }
}

fn outcome(result: &EventHandlerResult) -> String {
    match (&result.error, result.conflicts.is_empty()) {
        (Some(error), _) => error.code.to_string(),
        (None, false) => "conflict resolved".to_string(),
        (None, true) => "ok".to_string(),
    }
}

/// Run the replay command
pub async fn run(args: &ReplayArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args.config.as_deref())?;
    let fixture = load_fixture(&args.fixture)?;

    let admin = Arc::new(InMemoryAdminApi::new());
    for property in &fixture.admin {
        admin.insert(property.clone());
    }
    let client = Arc::new(InMemoryClientApi::new());
    for record in &fixture.client {
        client.insert(record.clone());
    }
    let service = SyncService::builder(admin.clone(), client.clone())
        .config(config)
        .build()?;

    let replay = replay(&service, fixture, args.reconcile).await;
    let stats = service.get_sync_statistics();

    match format {
        OutputFormat::Human => {
            let rows: Vec<Vec<String>> = replay
                .results
                .iter()
                .map(|result| {
                    vec![
                        result.event_id.clone(),
                        result.event_type.clone(),
                        result.handler.clone().unwrap_or_else(|| "-".to_string()),
                        outcome(result),
                    ]
                })
                .collect();
            print_table(&["EVENT", "TYPE", "HANDLER", "OUTCOME"], &rows);
            println!();
            for cycle in &replay.cycles {
                match (&cycle.reconcile, &cycle.error) {
                    (Some(summary), _) => println!(
                        "Cycle: {} checked, {} in sync, {} mirrored, {} resolved, {} failed",
                        summary.properties_checked,
                        summary.in_sync,
                        summary.mirrored,
                        summary.conflicts_resolved,
                        summary.failed.len()
                    ),
                    (None, Some(error)) => println!("Cycle failed: {}", error.message),
                    (None, None) => {}
                }
            }
            println!("Notifications: {}", replay.notifications.len());
            println!("Processed:     {}", stats.events_processed);
            println!("Failed:        {}", stats.events_failed);
            println!("Pending:       {}", stats.pending_events);
            println!("Conflicts:     {}", stats.conflicts_resolved);
            println!("Admin records: {}", admin.len());
        }
        OutputFormat::Json => {
            let value = json!({
                "results": replay.results,
                "cycles": replay.cycles,
                "notifications": replay.notifications,
                "statistics": stats,
            });
            println!("{}", serde_json::to_string(&value)?);
        }
    }

    Ok(())
}
