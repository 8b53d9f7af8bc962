use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use guardsync::{
    AdminApi, AuthToken, ClientApi, Clock, EventSource, FixedClock, HandlerContext,
    InMemoryAdminApi, InMemoryClientApi, Notification, SyncConfig, SyncEvent, SyncService,
    api::ApiResult,
    audit::MemoryAuditLogger,
    handler::{EventLimits, HandlerEnv},
    model::PropertySyncData,
    notify::{AlertLedger, NotificationBus},
};
use serde_json::{Value, json};
use tokio::sync::{Notify, Semaphore, broadcast};

pub const USER: &str = "user-1";
pub const CLIENT: &str = "client-1";

/// 2024-01-01T00:00:00Z, where every test clock starts.
pub const T0_MS: i64 = 1_704_067_200_000;

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(T0_MS).unwrap() + Duration::seconds(secs)
}

pub fn property(id: &str, version: u64, modified_secs: i64) -> PropertySyncData {
    PropertySyncData::new(id, format!("Property {id}"), version, at(modified_secs))
}

/// Build an event the way producers send it: as wire JSON.
pub fn wire_event(
    kind: &str,
    source: EventSource,
    property_id: Option<&str>,
    data: Value,
    timestamp: DateTime<Utc>,
) -> SyncEvent {
    let mut json = json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "type": kind,
        "source": source,
        "clientId": CLIENT,
        "userId": USER,
        "data": data,
        "timestamp": timestamp,
    });
    if let Some(property_id) = property_id {
        json["propertyId"] = json!(property_id);
    }
    serde_json::from_value(json).unwrap()
}

/// Context of the event's own user with a valid token.
pub fn context_for(event: &SyncEvent) -> HandlerContext {
    HandlerContext::for_event(event, AuthToken::new("test-token"))
}

/// Everything currently buffered in a subscription.
pub fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut received = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        received.push(notification);
    }
    received
}

/// In-memory collaborators around a service, on a fixed clock.
pub struct Harness {
    pub service: SyncService,
    pub admin: Arc<InMemoryAdminApi>,
    pub client: Arc<InMemoryClientApi>,
    pub audit: Arc<MemoryAuditLogger>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let admin = Arc::new(InMemoryAdminApi::new());
        let client = Arc::new(InMemoryClientApi::new());
        let audit = Arc::new(MemoryAuditLogger::new());
        let clock = Arc::new(FixedClock::new(T0_MS));
        let service = build_service(admin.clone(), client.clone(), audit.clone(), clock.clone(), config);
        Self {
            service,
            admin,
            client,
            audit,
            clock,
        }
    }

    /// Handler environment over the same collaborators, with its own bus.
    pub fn env(&self) -> HandlerEnv {
        HandlerEnv {
            admin: self.admin.clone(),
            client: self.client.clone(),
            audit: self.audit.clone(),
            bus: NotificationBus::new(64),
            alerts: AlertLedger::default(),
            clock: self.clock.clone(),
            limits: EventLimits::default(),
        }
    }

    /// A client-side event stamped with the current clock.
    pub fn event(&self, kind: &str, property_id: Option<&str>, data: Value) -> SyncEvent {
        wire_event(kind, EventSource::Client, property_id, data, self.clock.now())
    }

    pub fn admin_event(&self, kind: &str, property_id: Option<&str>, data: Value) -> SyncEvent {
        wire_event(kind, EventSource::Admin, property_id, data, self.clock.now())
    }

    /// Queue with a valid context for the event's user.
    pub fn queue(&self, event: SyncEvent) {
        let context = context_for(&event);
        self.service.queue_sync_event(event, context);
    }
}

pub fn build_service(
    admin: Arc<dyn AdminApi>,
    client: Arc<dyn ClientApi>,
    audit: Arc<MemoryAuditLogger>,
    clock: Arc<FixedClock>,
    config: SyncConfig,
) -> SyncService {
    SyncService::builder(admin, client)
        .config(config)
        .audit(audit)
        .clock(clock)
        .build()
        .unwrap()
}

/// Admin store whose property listing blocks until the test releases it.
pub struct GatedAdminApi {
    inner: InMemoryAdminApi,
    pub entered: Notify,
    pub release: Semaphore,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl GatedAdminApi {
    pub fn new() -> Self {
        Self {
            inner: InMemoryAdminApi::new(),
            entered: Notify::new(),
            release: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AdminApi for GatedAdminApi {
    async fn fetch_property(&self, id: &str) -> ApiResult<Option<PropertySyncData>> {
        self.inner.fetch_property(id).await
    }

    async fn fetch_all_properties(&self, limit: usize) -> ApiResult<Vec<PropertySyncData>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.entered.notify_one();

        self.release.acquire().await.unwrap().forget();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.fetch_all_properties(limit).await
    }

    async fn write_property(&self, id: &str, data: &PropertySyncData) -> ApiResult<()> {
        self.inner.write_property(id, data).await
    }

    async fn delete_property(&self, id: &str) -> ApiResult<()> {
        self.inner.delete_property(id).await
    }
}
