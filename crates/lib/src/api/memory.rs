//! In-process data stores.
//!
//! Used by the `replay` command and by tests. Both stores can be switched
//! to an unavailable state to exercise retry paths, and both keep a log of
//! every write they accepted.

use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;

use super::{AdminApi, ApiError, ApiResult, ClientApi, Side};
use crate::model::{ClientPropertyData, PropertySyncData};

fn unavailable(side: Side) -> ApiError {
    ApiError::Unavailable {
        side,
        reason: "store marked unavailable".to_string(),
    }
}

/// Admin property store backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryAdminApi {
    properties: Mutex<BTreeMap<String, PropertySyncData>>,
    writes: Mutex<Vec<PropertySyncData>>,
    deletes: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl InMemoryAdminApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a property without recording a write.
    pub fn insert(&self, property: PropertySyncData) {
        self.properties
            .lock()
            .unwrap()
            .insert(property.id.clone(), property);
    }

    pub fn get(&self, id: &str) -> Option<PropertySyncData> {
        self.properties.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.properties.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every snapshot accepted by `write_property`, in order.
    pub fn writes(&self) -> Vec<PropertySyncData> {
        self.writes.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> ApiResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable(Side::Admin));
        }
        Ok(())
    }
}

#[async_trait]
impl AdminApi for InMemoryAdminApi {
    async fn fetch_property(&self, id: &str) -> ApiResult<Option<PropertySyncData>> {
        self.check()?;
        Ok(self.get(id))
    }

    async fn fetch_all_properties(&self, limit: usize) -> ApiResult<Vec<PropertySyncData>> {
        self.check()?;
        Ok(self
            .properties
            .lock()
            .unwrap()
            .values()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn write_property(&self, id: &str, data: &PropertySyncData) -> ApiResult<()> {
        self.check()?;
        self.properties
            .lock()
            .unwrap()
            .insert(id.to_string(), data.clone());
        self.writes.lock().unwrap().push(data.clone());
        Ok(())
    }

    async fn delete_property(&self, id: &str) -> ApiResult<()> {
        self.check()?;
        self.properties.lock().unwrap().remove(id);
        self.deletes.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

/// Client property cache backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryClientApi {
    properties: Mutex<BTreeMap<String, ClientPropertyData>>,
    writes: Mutex<Vec<ClientPropertyData>>,
    removals: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl InMemoryClientApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, data: ClientPropertyData) {
        self.properties
            .lock()
            .unwrap()
            .insert(data.property_id.clone(), data);
    }

    pub fn get(&self, id: &str) -> Option<ClientPropertyData> {
        self.properties.lock().unwrap().get(id).cloned()
    }

    pub fn writes(&self) -> Vec<ClientPropertyData> {
        self.writes.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<String> {
        self.removals.lock().unwrap().clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> ApiResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable(Side::Client));
        }
        Ok(())
    }
}

#[async_trait]
impl ClientApi for InMemoryClientApi {
    async fn fetch_property_images(&self, id: &str) -> ApiResult<Option<ClientPropertyData>> {
        self.check()?;
        Ok(self.get(id))
    }

    async fn write_property_images(&self, id: &str, data: &ClientPropertyData) -> ApiResult<()> {
        self.check()?;
        self.properties
            .lock()
            .unwrap()
            .insert(id.to_string(), data.clone());
        self.writes.lock().unwrap().push(data.clone());
        Ok(())
    }

    async fn remove_property(&self, id: &str) -> ApiResult<()> {
        self.check()?;
        self.properties.lock().unwrap().remove(id);
        self.removals.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
