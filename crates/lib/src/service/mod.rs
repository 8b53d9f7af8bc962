//! The synchronization service.
//!
//! [`SyncService`] is a cheaply cloneable handle around the engine state. It
//! owns the pending queue, both mirrors (what was last resolved and written
//! to the admin side and to the client side), the processed-event history
//! and the statistics. It is the only component that writes to either side.
//!
//! Work happens in two places:
//!
//! * [`SyncService::process_pending_events`] drains due events through the
//!   [`HandlerRegistry`], resolves the conflicts handlers report, applies
//!   their effects and publishes their notifications.
//! * [`SyncService::perform_synchronization`] runs a full cycle: pending
//!   events first, then a reconciliation pass over every admin property.
//!
//! [`SyncService::start`] spawns a background task that runs cycles on a
//! timer and processes high-priority events on a short fast-path delay.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use guardsync::{InMemoryAdminApi, InMemoryClientApi, SyncConfig, SyncService};
//!
//! # async fn run() -> guardsync::Result<()> {
//! let service = SyncService::builder(
//!     Arc::new(InMemoryAdminApi::new()),
//!     Arc::new(InMemoryClientApi::new()),
//! )
//! .config(SyncConfig::default())
//! .build()?;
//!
//! let mut notifications = service.subscribe();
//! service.start()?;
//! // ... queue events, receive notifications ...
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Instant,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    api::{AdminApi, ClientApi},
    audit::{AuditLogger, TracingAuditLogger},
    clock::{Clock, SystemClock},
    config::{ConfigError, SyncConfig},
    error::{ErrorCode, ErrorReport, SyncError},
    event::{HandlerContext, SyncEvent},
    handler::{EventHandlerResult, HandlerEnv},
    model::{ClientPropertyData, PropertySyncData, SystemHealthSyncData},
    notify::{AlertLedger, Notification, NotificationBus, Topic},
    registry::HandlerRegistry,
};

mod background;
pub mod queue;
mod reconcile;

use background::SyncCommand;
pub use queue::{DeadLetter, PendingQueue, QueuedEvent};
pub use reconcile::ReconcileSummary;

/// Snapshot of the service state for health dashboards.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatistics {
    pub last_sync: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub cycles_completed: u64,
    pub admin_cache_size: usize,
    pub client_cache_size: usize,
    pub pending_events: usize,
    pub dead_letters: usize,
    pub is_active: bool,
    pub is_syncing: bool,
    pub sync_interval_secs: u64,
    pub events_processed: u64,
    pub events_failed: u64,
    pub conflicts_resolved: u64,
    pub latest_health_at: Option<DateTime<Utc>>,
}

/// Result of one reconciliation cycle.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub events: Vec<EventHandlerResult>,
    pub reconcile: Option<ReconcileSummary>,
    pub error: Option<ErrorReport>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// What a call to [`SyncService::perform_synchronization`] did.
#[derive(Clone, Debug)]
pub enum CycleOutcome {
    /// This call ran one cycle, plus one more for every batch of requests
    /// that arrived while it was running.
    Ran(Vec<CycleReport>),
    /// A cycle was already running; it will run once more when done.
    Coalesced,
}

impl CycleOutcome {
    pub fn reports(&self) -> &[CycleReport] {
        match self {
            CycleOutcome::Ran(reports) => reports,
            CycleOutcome::Coalesced => &[],
        }
    }

    pub fn is_coalesced(&self) -> bool {
        matches!(self, CycleOutcome::Coalesced)
    }
}

#[derive(Debug, Default)]
struct CycleState {
    running: bool,
    rerun: bool,
}

#[derive(Debug, Default)]
struct Counters {
    last_sync: Option<DateTime<Utc>>,
    last_duration_ms: Option<u64>,
    cycles_completed: u64,
    events_processed: u64,
    events_failed: u64,
    conflicts_resolved: u64,
}

/// Terminal outcomes by event id, oldest evicted first.
#[derive(Debug)]
struct ProcessedHistory {
    capacity: usize,
    order: VecDeque<String>,
    results: HashMap<String, EventHandlerResult>,
}

impl ProcessedHistory {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            results: HashMap::new(),
        }
    }

    fn get(&self, event_id: &str) -> Option<&EventHandlerResult> {
        self.results.get(event_id)
    }

    fn forget(&mut self, event_id: &str) {
        if self.results.remove(event_id).is_some() {
            self.order.retain(|id| id != event_id);
        }
    }

    fn record(&mut self, result: EventHandlerResult) {
        // Events without an id cannot be recognised when they come back.
        if self.capacity == 0 || result.event_id.is_empty() {
            return;
        }
        let id = result.event_id.clone();
        if self.results.insert(id.clone(), result).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.results.remove(&oldest);
            }
        }
    }
}

#[derive(Debug)]
struct State {
    admin_cache: HashMap<String, PropertySyncData>,
    client_cache: HashMap<String, ClientPropertyData>,
    processed: ProcessedHistory,
    dead_letters: Vec<DeadLetter>,
    latest_health: Option<SystemHealthSyncData>,
    counters: Counters,
}

struct Background {
    commands: mpsc::Sender<SyncCommand>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: SyncConfig,
    registry: HandlerRegistry,
    env: HandlerEnv,
    queue: PendingQueue,
    state: Mutex<State>,
    cycle: Mutex<CycleState>,
    /// Serializes event processing between cycles and the fast path.
    processing: tokio::sync::Mutex<()>,
    /// Signalled whenever a failed event is queued for retry.
    rescheduled: tokio::sync::Notify,
    background: Mutex<Option<Background>>,
}

/// Builder for [`SyncService`].
///
/// Defaults: [`SyncConfig::default`], the default handler registry, a
/// [`TracingAuditLogger`] and the [`SystemClock`].
pub struct SyncServiceBuilder {
    admin: Arc<dyn AdminApi>,
    client: Arc<dyn ClientApi>,
    config: SyncConfig,
    audit: Arc<dyn AuditLogger>,
    clock: Arc<dyn Clock>,
    registry: HandlerRegistry,
}

impl SyncServiceBuilder {
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> Result<SyncService, ConfigError> {
        self.config.validate()?;

        let env = HandlerEnv {
            admin: self.admin,
            client: self.client,
            audit: self.audit,
            bus: NotificationBus::new(self.config.notification_capacity),
            alerts: AlertLedger::new(self.config.processed_history),
            clock: self.clock,
            limits: self.config.event_limits(),
        };
        let state = State {
            admin_cache: HashMap::new(),
            client_cache: HashMap::new(),
            processed: ProcessedHistory::new(self.config.processed_history),
            dead_letters: Vec::new(),
            latest_health: None,
            counters: Counters::default(),
        };

        Ok(SyncService {
            inner: Arc::new(Inner {
                config: self.config,
                registry: self.registry,
                env,
                queue: PendingQueue::new(),
                state: Mutex::new(state),
                cycle: Mutex::new(CycleState::default()),
                processing: tokio::sync::Mutex::new(()),
                rescheduled: tokio::sync::Notify::new(),
                background: Mutex::new(None),
            }),
        })
    }
}

/// Handle to a synchronization engine. Clones share the same engine.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("pending", &self.inner.queue.len())
            .finish_non_exhaustive()
    }
}

impl SyncService {
    pub fn builder(admin: Arc<dyn AdminApi>, client: Arc<dyn ClientApi>) -> SyncServiceBuilder {
        SyncServiceBuilder {
            admin,
            client,
            config: SyncConfig::default(),
            audit: Arc::new(TracingAuditLogger),
            clock: Arc::new(SystemClock),
            registry: HandlerRegistry::with_default_handlers(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    fn env(&self) -> &HandlerEnv {
        &self.inner.env
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.env.clock.now()
    }

    /// Receive every notification published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.env.bus.subscribe()
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.inner.env.bus
    }

    /// Start the background loop: a first cycle after the initial delay,
    /// then one per interval.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), SyncError> {
        let mut background = self.inner.background.lock().unwrap();
        if background.is_some() {
            return Err(SyncError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(100);
        let handle = tokio::spawn(background::run(self.clone(), rx));
        *background = Some(Background {
            commands: tx,
            handle,
        });
        info!(
            interval_secs = self.inner.config.sync_interval_secs,
            "synchronization service started"
        );
        Ok(())
    }

    /// Stop the background loop.
    ///
    /// Safe to call at any time, including while a cycle runs: the running
    /// cycle completes, no further cycle is scheduled. The loop's timers and
    /// command channel are released. Notification subscriptions belong to
    /// the service rather than the loop, so they stay open and keep
    /// receiving from direct calls and from a later [`start`](Self::start).
    pub async fn stop(&self) -> Result<(), SyncError> {
        let Some(background) = self.inner.background.lock().unwrap().take() else {
            return Ok(());
        };

        // A closed channel means the loop already exited.
        let _ = background.commands.send(SyncCommand::Shutdown).await;
        if let Err(e) = background.handle.await {
            error!("background sync task failed: {e}");
            return Err(SyncError::CommandSendError(e.to_string()));
        }
        info!("synchronization service stopped");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.inner.background.lock().unwrap().is_some()
    }

    fn send_command(&self, command: SyncCommand) -> Result<(), SyncError> {
        let background = self.inner.background.lock().unwrap();
        let Some(background) = background.as_ref() else {
            return Err(SyncError::NotRunning);
        };
        background
            .commands
            .try_send(command)
            .map_err(|e| SyncError::CommandSendError(e.to_string()))
    }

    /// Append an event to the pending queue.
    ///
    /// Property updates and image uploads also ask the background loop for
    /// processing after the short high-priority delay.
    pub fn queue_sync_event(&self, event: SyncEvent, context: HandlerContext) {
        let high_priority = event.kind.known().is_some_and(|kind| kind.is_high_priority());
        debug!(
            event_id = %event.id,
            event_type = %event.kind,
            high_priority,
            "queueing sync event"
        );
        let now_ms = self.inner.env.clock.now_millis();
        self.inner
            .queue
            .push(QueuedEvent::new(event, context, now_ms));

        if high_priority && self.is_active() {
            if let Err(e) = self.send_command(SyncCommand::Expedite) {
                debug!("fast path not scheduled: {e}");
            }
        }
    }

    /// Ask the background loop for an out-of-cycle reconciliation.
    pub fn request_sync(&self, reason: impl Into<String>) -> Result<(), SyncError> {
        self.send_command(SyncCommand::Trigger {
            reason: reason.into(),
        })
    }

    /// Run an out-of-cycle reconciliation now.
    pub async fn trigger_sync(&self, reason: &str) -> CycleOutcome {
        info!(reason, "synchronization triggered");
        self.perform_synchronization().await
    }

    /// Run a full cycle unless one is already running.
    ///
    /// A call made while a cycle runs returns [`CycleOutcome::Coalesced`] and
    /// makes the running call loop once more after it finishes, however many
    /// such calls arrive.
    pub async fn perform_synchronization(&self) -> CycleOutcome {
        {
            let mut cycle = self.inner.cycle.lock().unwrap();
            if cycle.running {
                cycle.rerun = true;
                debug!("cycle already running, coalescing");
                return CycleOutcome::Coalesced;
            }
            cycle.running = true;
        }

        let mut reports = Vec::new();
        loop {
            reports.push(self.run_cycle().await);

            let mut cycle = self.inner.cycle.lock().unwrap();
            if cycle.rerun {
                cycle.rerun = false;
                continue;
            }
            cycle.running = false;
            break;
        }
        CycleOutcome::Ran(reports)
    }

    async fn run_cycle(&self) -> CycleReport {
        let started_at = self.now();
        async move {
            let timer = Instant::now();
            let events = self.process_pending_events().await;
            let reconciled = reconcile::reconcile_all(self).await;
            let duration_ms = timer.elapsed().as_millis() as u64;

            match reconciled {
                Ok(summary) => {
                    {
                        let mut state = self.inner.state.lock().unwrap();
                        state.counters.last_sync = Some(self.now());
                        state.counters.last_duration_ms = Some(duration_ms);
                        state.counters.cycles_completed += 1;
                    }
                    info!(
                        duration_ms,
                        properties = summary.properties_checked,
                        events = events.len(),
                        conflicts = summary.conflicts_resolved,
                        "sync cycle completed"
                    );
                    self.inner.env.bus.emit(
                        Topic::SyncCompleted,
                        json!({
                            "duration": duration_ms,
                            "count": summary.properties_checked,
                            "eventsProcessed": events.len(),
                            "conflictsResolved": summary.conflicts_resolved,
                        }),
                        self.now(),
                    );
                    CycleReport {
                        started_at,
                        duration_ms,
                        events,
                        reconcile: Some(summary),
                        error: None,
                    }
                }
                Err(e) => {
                    error!(error = %e, duration_ms, "sync cycle failed");
                    let report = e.report();
                    self.inner
                        .env
                        .audit
                        .log_error(&report, &json!({ "phase": "reconcile" }))
                        .await;
                    self.publish_error(&report, None);
                    CycleReport {
                        started_at,
                        duration_ms,
                        events,
                        reconcile: None,
                        error: Some(report),
                    }
                }
            }
        }
        .instrument(info_span!("sync_cycle"))
        .await
    }

    fn publish_error(&self, report: &ErrorReport, event: Option<&SyncEvent>) {
        self.inner.env.bus.emit(
            Topic::SyncError,
            json!({
                "type": report.code,
                "message": report.message,
                "severity": report.severity,
                "retryable": report.retryable,
                "eventId": event.map(|e| e.id.as_str()),
                "eventType": event.map(|e| e.kind.to_string()),
                "timestamp": self.now(),
            }),
            self.now(),
        );
    }

    /// Process every queued event that is due, one at a time, oldest first.
    pub async fn process_pending_events(&self) -> Vec<EventHandlerResult> {
        let _guard = self.inner.processing.lock().await;
        let ready = self.inner.queue.take_ready(self.inner.env.clock.now_millis());
        if ready.is_empty() {
            return Vec::new();
        }
        debug!(count = ready.len(), "processing pending events");

        let mut results = Vec::with_capacity(ready.len());
        for entry in ready {
            results.push(self.process_entry(entry).await);
        }
        results
    }

    /// Process one event immediately, bypassing the queue.
    ///
    /// Failures follow the same retry and dead-letter rules as queued events.
    pub async fn process_event(&self, event: SyncEvent, context: HandlerContext) -> EventHandlerResult {
        let _guard = self.inner.processing.lock().await;
        let now_ms = self.inner.env.clock.now_millis();
        self.process_entry(QueuedEvent::new(event, context, now_ms))
            .await
    }

    async fn process_entry(&self, entry: QueuedEvent) -> EventHandlerResult {
        let replay = {
            let state = self.inner.state.lock().unwrap();
            state.processed.get(&entry.event.id).cloned()
        };
        if let Some(mut recorded) = replay {
            debug!(event_id = %entry.event.id, "event already processed, replaying result");
            recorded.replayed = true;
            return recorded;
        }

        let mut result = self
            .inner
            .registry
            .dispatch(&entry.event, &entry.context, self.env())
            .await;

        if result.success
            && let Err(e) = reconcile::apply_result(self, &mut result).await
        {
            warn!(event_id = %entry.event.id, error = %e, "failed to apply event effects");
            result.success = false;
            result.error = Some(e.report());
        }

        if result.success {
            for notification in std::mem::take(&mut result.notifications) {
                self.inner.env.bus.publish(notification.clone());
                result.notifications.push(notification);
            }
            self.record_terminal(&result, true);
            return result;
        }

        if result.is_retryable() {
            return self.retry_or_dead_letter(entry, result).await;
        }

        let Some(report) = result.error.clone() else {
            return result;
        };
        if report.code != ErrorCode::UnsupportedEventType {
            self.inner
                .env
                .audit
                .log_error(&report, &json!({ "eventId": entry.event.id }))
                .await;
        }
        self.publish_error(&report, Some(&entry.event));
        self.record_terminal(&result, false);
        result
    }

    async fn retry_or_dead_letter(
        &self,
        mut entry: QueuedEvent,
        mut result: EventHandlerResult,
    ) -> EventHandlerResult {
        entry.attempts += 1;
        entry.last_error = result.error.clone();
        let last_error = result
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default();

        if entry.attempts < self.inner.config.max_attempts {
            let delay_ms = self.inner.config.retry_delay_ms(entry.attempts);
            entry.next_attempt_ms = self.inner.env.clock.now_millis() + delay_ms as i64;
            warn!(
                event_id = %entry.event.id,
                attempts = entry.attempts,
                delay_ms,
                "event failed, will retry"
            );
            self.inner.queue.push(entry);
            self.inner.rescheduled.notify_one();
            return result;
        }

        let exhausted = SyncError::RetriesExhausted {
            attempts: entry.attempts,
            last_error,
        };
        error!(event_id = %entry.event.id, attempts = entry.attempts, "{exhausted}");
        let report = exhausted.report().with_details(json!({
            "eventId": entry.event.id,
            "eventType": entry.event.kind,
            "lastError": entry.last_error,
        }));
        self.inner
            .env
            .audit
            .log_error(&report, &json!({ "eventId": entry.event.id }))
            .await;
        self.publish_error(&report, Some(&entry.event));

        result.error = Some(report.clone());
        self.record_terminal(&result, false);
        self.inner
            .state
            .lock()
            .unwrap()
            .dead_letters
            .push(DeadLetter {
                event: entry.event,
                context: entry.context,
                attempts: entry.attempts,
                error: report,
                dead_at: self.now(),
            });
        result
    }

    fn record_terminal(&self, result: &EventHandlerResult, success: bool) {
        let mut state = self.inner.state.lock().unwrap();
        if success {
            state.counters.events_processed += 1;
        } else {
            state.counters.events_failed += 1;
        }
        state.processed.record(result.clone());
    }

    /// Events that used up their attempt budget, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.state.lock().unwrap().dead_letters.clone()
    }

    /// Put a dead-lettered event back in the queue with a fresh budget.
    ///
    /// Returns `false` if no dead letter has that event id.
    pub fn retry_dead_letter(&self, event_id: &str) -> bool {
        let letter = {
            let mut state = self.inner.state.lock().unwrap();
            let Some(index) = state
                .dead_letters
                .iter()
                .position(|letter| letter.event.id == event_id)
            else {
                return false;
            };
            state.processed.forget(event_id);
            state.dead_letters.remove(index)
        };

        info!(event_id, "re-queueing dead letter");
        let now_ms = self.inner.env.clock.now_millis();
        self.inner
            .queue
            .push(QueuedEvent::new(letter.event, letter.context, now_ms));
        true
    }

    pub fn latest_health(&self) -> Option<SystemHealthSyncData> {
        self.inner.state.lock().unwrap().latest_health.clone()
    }

    /// Last resolved admin-side snapshot of a property.
    pub fn cached_property(&self, property_id: &str) -> Option<PropertySyncData> {
        self.inner
            .state
            .lock()
            .unwrap()
            .admin_cache
            .get(property_id)
            .cloned()
    }

    /// Last resolved client-side snapshot of a property.
    pub fn cached_client_property(&self, property_id: &str) -> Option<ClientPropertyData> {
        self.inner
            .state
            .lock()
            .unwrap()
            .client_cache
            .get(property_id)
            .cloned()
    }

    pub fn pending_events(&self) -> usize {
        self.inner.queue.len()
    }

    async fn retry_scheduled(&self) {
        self.inner.rescheduled.notified().await
    }

    /// Time until the earliest retry is due, if any event waits on one.
    fn next_retry_in(&self) -> Option<std::time::Duration> {
        let due_ms = self.inner.queue.next_retry_ms()?;
        let wait_ms = (due_ms - self.inner.env.clock.now_millis()).max(0);
        Some(std::time::Duration::from_millis(wait_ms as u64))
    }

    pub fn get_sync_statistics(&self) -> SyncStatistics {
        let is_syncing = self.inner.cycle.lock().unwrap().running;
        let is_active = self.is_active();
        let state = self.inner.state.lock().unwrap();
        SyncStatistics {
            last_sync: state.counters.last_sync,
            last_duration_ms: state.counters.last_duration_ms,
            cycles_completed: state.counters.cycles_completed,
            admin_cache_size: state.admin_cache.len(),
            client_cache_size: state.client_cache.len(),
            pending_events: self.inner.queue.len(),
            dead_letters: state.dead_letters.len(),
            is_active,
            is_syncing,
            sync_interval_secs: self.inner.config.sync_interval_secs,
            events_processed: state.counters.events_processed,
            events_failed: state.counters.events_failed,
            conflicts_resolved: state.counters.conflicts_resolved,
            latest_health_at: state.latest_health.as_ref().map(|h| h.timestamp),
        }
    }
}
