//! Total row counts and per-row child counts, keyed by fingerprint like the
//! row fetches they accompany.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use serde_json::{Map, json};
use tracing::{debug, warn};

use crate::cache::{CacheStats, FailurePolicy, RequestCache};
use crate::catalog::{CatalogClient, CatalogRequest};
use crate::domain::CatalogEntity;
use crate::error::PortalError;
use crate::fetch::Fetched;
use crate::query::{Fingerprint, Query, ViewScope};

/// A count of child entities shown as a column, e.g. datasets per
/// investigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChildCount {
    pub entity: CatalogEntity,
    pub parent_column: String,
}

impl ChildCount {
    pub fn new(entity: CatalogEntity, parent_column: impl Into<String>) -> Self {
        Self {
            entity,
            parent_column: parent_column.into(),
        }
    }

    pub fn datasets_per_investigation() -> Self {
        Self::new(CatalogEntity::Dataset, "investigation.id")
    }

    pub fn datafiles_per_dataset() -> Self {
        Self::new(CatalogEntity::Datafile, "dataset.id")
    }

    fn request(&self, row_id: u64) -> CatalogRequest {
        let mut where_clause = Map::new();
        where_clause.insert(self.parent_column.clone(), json!({ "eq": row_id }));
        CatalogRequest {
            where_clause,
            ..CatalogRequest::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CountKey {
    view: String,
    fingerprint: Fingerprint,
    child: Option<(ChildCount, u64)>,
}

struct Generation {
    fingerprint: Fingerprint,
    epoch: u64,
}

pub struct CountResolver<C> {
    client: Arc<C>,
    counts: RequestCache<CountKey, u64>,
    views: Mutex<HashMap<String, Generation>>,
}

impl<C: CatalogClient> CountResolver<C> {
    pub fn new(client: Arc<C>, capacity: usize) -> Self {
        Self {
            client,
            counts: RequestCache::new(capacity, FailurePolicy::Retain),
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Total number of rows in the collection selected by `query`.
    pub async fn fetch_count(
        &self,
        scope: &ViewScope,
        query: &Query,
    ) -> Result<Fetched<u64>, PortalError> {
        let (fingerprint, epoch) = self.observe(scope, query);
        let key = CountKey {
            view: scope.view_id.clone(),
            fingerprint,
            child: None,
        };
        let request = CatalogRequest::count(scope, query);
        let client = Arc::clone(&self.client);
        let entity = scope.entity;
        let result = self
            .counts
            .get_or_fetch(&key, move || async move {
                client.fetch_count(entity, &request).await
            })
            .await;
        self.settle(scope, epoch, result)
    }

    /// Child count for one row. Cached per row id until the view's
    /// fingerprint changes.
    pub async fn fetch_child_count(
        &self,
        scope: &ViewScope,
        query: &Query,
        child: &ChildCount,
        row_id: u64,
    ) -> Result<Fetched<u64>, PortalError> {
        let (fingerprint, epoch) = self.observe(scope, query);
        let key = CountKey {
            view: scope.view_id.clone(),
            fingerprint,
            child: Some((child.clone(), row_id)),
        };
        let request = child.request(row_id);
        let client = Arc::clone(&self.client);
        let entity = child.entity;
        let result = self
            .counts
            .get_or_fetch(&key, move || async move {
                client.fetch_count(entity, &request).await
            })
            .await;
        self.settle(scope, epoch, result)
    }

    /// Child counts for every row on screen, resolved concurrently. Each row
    /// succeeds or fails on its own.
    pub async fn fetch_child_counts(
        &self,
        scope: &ViewScope,
        query: &Query,
        child: &ChildCount,
        row_ids: &[u64],
    ) -> Vec<(u64, Result<Fetched<u64>, PortalError>)> {
        join_all(row_ids.iter().map(|row_id| async move {
            (*row_id, self.fetch_child_count(scope, query, child, *row_id).await)
        }))
        .await
    }

    pub fn release_view(&self, view: &str) {
        self.lock_views().remove(view);
        self.counts.retain(|key| key.view != view);
    }

    pub fn stats(&self) -> CacheStats {
        self.counts.stats()
    }

    fn observe(&self, scope: &ViewScope, query: &Query) -> (Fingerprint, u64) {
        let fingerprint = Fingerprint::of(scope, query);
        let mut views = self.lock_views();
        let generation = views
            .entry(scope.view_id.clone())
            .or_insert_with(|| Generation {
                fingerprint: fingerprint.clone(),
                epoch: 0,
            });
        if generation.fingerprint != fingerprint {
            generation.fingerprint = fingerprint.clone();
            generation.epoch += 1;
            let dropped = self
                .counts
                .retain(|key| key.view != scope.view_id || key.fingerprint == fingerprint);
            debug!(view = %scope.view_id, epoch = generation.epoch, dropped, "count fingerprint changed");
        }
        (fingerprint, generation.epoch)
    }

    fn settle(
        &self,
        scope: &ViewScope,
        epoch: u64,
        result: Result<u64, PortalError>,
    ) -> Result<Fetched<u64>, PortalError> {
        let current = self
            .lock_views()
            .get(&scope.view_id)
            .is_some_and(|generation| generation.epoch == epoch);
        if !current {
            debug!(view = %scope.view_id, "discarding superseded count");
            return Ok(Fetched::Superseded);
        }
        match result {
            Ok(count) => Ok(Fetched::Current(count)),
            Err(err) => {
                warn!(view = %scope.view_id, entity = %scope.entity, error = %err, "count fetch failed");
                Err(err)
            }
        }
    }

    fn lock_views(&self) -> MutexGuard<'_, HashMap<String, Generation>> {
        self.views
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
