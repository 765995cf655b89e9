//! Shared mock clients for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use catalog_portal::cart::CartItem;
use catalog_portal::catalog::{CatalogClient, CatalogRequest};
use catalog_portal::domain::{CatalogEntity, EntityType};
use catalog_portal::download::{Download, DownloadClient, SubmitRequest};
use catalog_portal::error::PortalError;

/// In-memory catalog of `total` rows. Rows carry the `title` filter text so
/// tests can tell which query produced them.
#[derive(Default)]
pub struct MockCatalog {
    pub total: u64,
    pub row_calls: Mutex<Vec<CatalogRequest>>,
    pub count_calls: Mutex<Vec<CatalogRequest>>,
    gates: Mutex<Vec<(String, Arc<Notify>)>>,
    failing_markers: Mutex<Vec<String>>,
    counts_by_id: Mutex<HashMap<u64, u64>>,
    failing_ids: Mutex<HashSet<u64>>,
    datafile_sizes: Mutex<HashMap<u64, u64>>,
    counts_fail: Mutex<bool>,
}

impl MockCatalog {
    pub fn with_total(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// The next request whose `where` text contains `marker` waits until the
    /// returned notify is triggered.
    pub fn hold(&self, marker: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .push((marker.to_string(), Arc::clone(&notify)));
        notify
    }

    /// Row requests whose `where` text contains `marker` fail.
    pub fn fail_rows(&self, marker: &str) {
        self.failing_markers.lock().unwrap().push(marker.to_string());
    }

    /// Count for requests scoped by `{"eq": id}`.
    pub fn set_count_for(&self, id: u64, count: u64) {
        self.counts_by_id.lock().unwrap().insert(id, count);
    }

    /// Counts and sizes scoped by `id` fail.
    pub fn fail_id(&self, id: u64) {
        self.failing_ids.lock().unwrap().insert(id);
    }

    /// Every count request fails; row requests are unaffected.
    pub fn fail_counts(&self) {
        *self.counts_fail.lock().unwrap() = true;
    }

    pub fn set_datafile_size(&self, id: u64, size: u64) {
        self.datafile_sizes.lock().unwrap().insert(id, size);
    }

    pub fn row_call_count(&self) -> usize {
        self.row_calls.lock().unwrap().len()
    }

    pub fn count_call_count(&self) -> usize {
        self.count_calls.lock().unwrap().len()
    }

    async fn wait_for_gate(&self, request: &CatalogRequest) {
        let text = where_text(request);
        let gate = {
            let mut gates = self.gates.lock().unwrap();
            gates
                .iter()
                .position(|(marker, _)| text.contains(marker.as_str()))
                .map(|index| gates.remove(index).1)
        };
        if let Some(notify) = gate {
            notify.notified().await;
        }
    }
}

fn where_text(request: &CatalogRequest) -> String {
    Value::Object(request.where_clause.clone()).to_string()
}

fn scoped_id(request: &CatalogRequest) -> Option<u64> {
    request
        .where_clause
        .values()
        .find_map(|condition| condition.get("eq").and_then(Value::as_u64))
}

#[async_trait]
impl CatalogClient for MockCatalog {
    async fn fetch_rows(
        &self,
        _entity: CatalogEntity,
        request: &CatalogRequest,
    ) -> Result<Vec<Value>, PortalError> {
        self.row_calls.lock().unwrap().push(request.clone());
        self.wait_for_gate(request).await;
        tokio::task::yield_now().await;

        let text = where_text(request);
        let failing = self
            .failing_markers
            .lock()
            .unwrap()
            .iter()
            .any(|marker| text.contains(marker.as_str()));
        if failing {
            return Err(PortalError::CatalogStatus {
                status: 503,
                message: "unavailable".to_string(),
            });
        }

        let tag = request
            .where_clause
            .get("title")
            .and_then(|condition| condition.get("like"))
            .and_then(Value::as_str)
            .unwrap_or("row")
            .to_string();
        let start = request.skip.unwrap_or(0).min(self.total);
        let stop = (start + request.limit.unwrap_or(self.total)).min(self.total);
        Ok((start..stop)
            .map(|index| json!({ "id": index, "title": format!("{tag}-{index}") }))
            .collect())
    }

    async fn fetch_count(
        &self,
        _entity: CatalogEntity,
        request: &CatalogRequest,
    ) -> Result<u64, PortalError> {
        self.count_calls.lock().unwrap().push(request.clone());
        self.wait_for_gate(request).await;
        tokio::task::yield_now().await;

        if *self.counts_fail.lock().unwrap() {
            return Err(PortalError::CatalogHttp("count timed out".to_string()));
        }
        if let Some(id) = scoped_id(request) {
            if self.failing_ids.lock().unwrap().contains(&id) {
                return Err(PortalError::CatalogHttp(format!("count for {id} timed out")));
            }
            if let Some(count) = self.counts_by_id.lock().unwrap().get(&id) {
                return Ok(*count);
            }
        }
        Ok(self.total)
    }

    async fn fetch_datafile_size(&self, id: u64) -> Result<u64, PortalError> {
        tokio::task::yield_now().await;
        self.datafile_sizes
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .ok_or_else(|| PortalError::CatalogStatus {
                status: 404,
                message: format!("datafile {id} not found"),
            })
    }
}

/// In-memory download service.
#[derive(Default)]
pub struct MockDownload {
    pub cart: Mutex<Vec<CartItem>>,
    pub size_calls: Mutex<usize>,
    pub submitted: Mutex<Vec<SubmitRequest>>,
    sizes: Mutex<HashMap<(EntityType, u64), u64>>,
    failing: Mutex<HashSet<(EntityType, u64)>>,
}

impl MockDownload {
    pub fn set_size(&self, entity_type: EntityType, id: u64, size: u64) {
        self.sizes.lock().unwrap().insert((entity_type, id), size);
    }

    pub fn fail(&self, entity_type: EntityType, id: u64) {
        self.failing.lock().unwrap().insert((entity_type, id));
    }
}

#[async_trait]
impl DownloadClient for MockDownload {
    async fn fetch_cart(&self) -> Result<Vec<CartItem>, PortalError> {
        Ok(self.cart.lock().unwrap().clone())
    }

    async fn add_cart_items(&self, items: &[(EntityType, u64)]) -> Result<Vec<CartItem>, PortalError> {
        let mut cart = self.cart.lock().unwrap();
        for (entity_type, id) in items {
            cart.push(CartItem::new(*entity_type, *id, format!("{entity_type}-{id}")));
        }
        Ok(cart.clone())
    }

    async fn remove_cart_item(
        &self,
        entity_type: EntityType,
        entity_id: u64,
    ) -> Result<(), PortalError> {
        self.cart
            .lock()
            .unwrap()
            .retain(|item| !(item.entity_type == entity_type && item.entity_id == entity_id));
        Ok(())
    }

    async fn remove_all_cart_items(&self) -> Result<(), PortalError> {
        self.cart.lock().unwrap().clear();
        Ok(())
    }

    async fn get_size(&self, entity_type: EntityType, entity_id: u64) -> Result<u64, PortalError> {
        *self.size_calls.lock().unwrap() += 1;
        tokio::task::yield_now().await;
        if self.failing.lock().unwrap().contains(&(entity_type, entity_id)) {
            return Err(PortalError::DownloadStatus {
                status: 500,
                message: format!("size of {entity_type} {entity_id} unavailable"),
            });
        }
        Ok(self
            .sizes
            .lock()
            .unwrap()
            .get(&(entity_type, entity_id))
            .copied()
            .unwrap_or(0))
    }

    async fn submit_cart(&self, request: &SubmitRequest) -> Result<u64, PortalError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(request.clone());
        Ok(submitted.len() as u64)
    }

    async fn get_download(&self, download_id: u64) -> Result<Option<Download>, PortalError> {
        let submitted = self.submitted.lock().unwrap();
        let index = (download_id as usize).checked_sub(1);
        Ok(index.and_then(|index| submitted.get(index)).map(|request| Download {
            id: download_id,
            file_name: Some(request.file_name.clone()),
            status: Some("PREPARING".to_string()),
            transport: Some(request.transport.clone()),
            size: None,
            email: request.email.clone(),
            prepared_id: None,
            created_at: None,
        }))
    }
}
