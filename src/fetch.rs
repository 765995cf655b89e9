//! Cache-aware retrieval of entity collections.
//!
//! Every request is keyed by view, fingerprint and slice. Identical
//! concurrent requests share one network call through [`RequestCache`].
//! Each view remembers the fingerprint it last asked for; when that changes,
//! the view's older entries are dropped and responses still in flight for
//! them resolve as [`Fetched::Superseded`].

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheStats, FailurePolicy, RequestCache, SlotStatus};
use crate::catalog::{CatalogClient, CatalogRequest, Slice};
use crate::domain::PageSize;
use crate::error::PortalError;
use crate::query::{Fingerprint, Query, ViewScope};
use crate::window::RowWindow;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub view: String,
    pub fingerprint: Fingerprint,
    pub slice: Slice,
}

/// Rows delivered to a view, starting at absolute row `offset`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub fingerprint: Fingerprint,
    pub offset: u64,
    pub rows: Arc<Vec<Value>>,
}

impl Collection {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of a request that may have been overtaken by a newer one.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Current(T),
    Superseded,
}

impl<T> Fetched<T> {
    pub fn current(self) -> Option<T> {
        match self {
            Fetched::Current(value) => Some(value),
            Fetched::Superseded => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Fetched::Superseded)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Fetched::Current(value) => Fetched::Current(f(value)),
            Fetched::Superseded => Fetched::Superseded,
        }
    }
}

struct ViewState {
    fingerprint: Fingerprint,
    epoch: u64,
    latest: Option<Slice>,
    page: Option<Collection>,
    window: RowWindow<Value>,
}

impl ViewState {
    fn new(fingerprint: Fingerprint, epoch: u64) -> Self {
        Self {
            fingerprint,
            epoch,
            latest: None,
            page: None,
            window: RowWindow::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Ticket {
    fingerprint: Fingerprint,
    epoch: u64,
}

pub struct FetchOrchestrator<C> {
    client: Arc<C>,
    default_results: PageSize,
    rows: RequestCache<RequestKey, Arc<Vec<Value>>>,
    views: Mutex<HashMap<String, ViewState>>,
}

impl<C: CatalogClient> FetchOrchestrator<C> {
    pub fn new(client: Arc<C>, capacity: usize, default_results: PageSize) -> Self {
        Self {
            client,
            default_results,
            rows: RequestCache::new(capacity, FailurePolicy::Retain),
            views: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_results(&self) -> PageSize {
        self.default_results
    }

    /// Whole-page mode: reads page `query.page` of size `query.results`.
    pub async fn fetch_page(
        &self,
        scope: &ViewScope,
        query: &Query,
    ) -> Result<Fetched<Collection>, PortalError> {
        let slice = Slice::Page {
            page: query.page_or_first(),
            results: query.results_or(self.default_results),
        };
        let ticket = self.observe(scope, query, Some(slice));
        let result = self.load(scope, query, &ticket, slice).await;

        let mut views = self.lock_views();
        let Some(state) = views.get_mut(&scope.view_id) else {
            return Ok(Fetched::Superseded);
        };
        if state.epoch != ticket.epoch || state.latest != Some(slice) {
            debug!(view = %scope.view_id, "discarding superseded page response");
            return Ok(Fetched::Superseded);
        }
        match result {
            Ok(rows) => {
                let collection = Collection {
                    fingerprint: ticket.fingerprint,
                    offset: slice.skip(),
                    rows,
                };
                state.page = Some(collection.clone());
                Ok(Fetched::Current(collection))
            }
            Err(err) => {
                state.page = None;
                warn!(view = %scope.view_id, entity = %scope.entity, error = %err, "page fetch failed");
                Err(err)
            }
        }
    }

    /// Windowed mode: makes sure `range` is loaded and returns its rows.
    /// Already covered parts are not requested again.
    pub async fn fetch_window(
        &self,
        scope: &ViewScope,
        query: &Query,
        range: Range<u64>,
    ) -> Result<Fetched<Collection>, PortalError> {
        let ticket = self.observe(scope, query, None);
        let gaps = self
            .lock_views()
            .get(&scope.view_id)
            .map(|state| state.window.gaps(range.clone()))
            .unwrap_or_else(|| vec![range.clone()]);

        let issued = &ticket;
        let responses = join_all(gaps.into_iter().map(|gap| {
            let slice = Slice::Window {
                start: gap.start,
                stop: gap.end,
            };
            async move { (gap, self.load(scope, query, issued, slice).await) }
        }))
        .await;

        let mut views = self.lock_views();
        let Some(state) = views.get_mut(&scope.view_id) else {
            return Ok(Fetched::Superseded);
        };
        if state.epoch != ticket.epoch {
            debug!(view = %scope.view_id, "discarding superseded window response");
            return Ok(Fetched::Superseded);
        }

        let mut failure = None;
        for (gap, result) in responses {
            match result {
                Ok(rows) => state.window.merge(gap, rows.to_vec()),
                Err(err) => {
                    warn!(
                        view = %scope.view_id,
                        entity = %scope.entity,
                        start = gap.start,
                        stop = gap.end,
                        error = %err,
                        "window fetch failed"
                    );
                    failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        Ok(Fetched::Current(Collection {
            fingerprint: ticket.fingerprint,
            offset: range.start,
            rows: Arc::new(state.window.slice(range)),
        }))
    }

    /// Last page delivered to the view for its current fingerprint.
    pub fn visible(&self, view: &str) -> Option<Collection> {
        self.lock_views()
            .get(view)
            .and_then(|state| state.page.clone())
    }

    /// The view's growing windowed sequence, in row order.
    pub fn loaded_rows(&self, view: &str) -> Vec<Value> {
        self.lock_views()
            .get(view)
            .map(|state| state.window.rows())
            .unwrap_or_default()
    }

    pub fn status(&self, key: &RequestKey) -> Option<SlotStatus> {
        self.rows.status(key)
    }

    /// Forgets a view that no longer has subscribers, along with its entries.
    pub fn release_view(&self, view: &str) {
        self.lock_views().remove(view);
        let dropped = self.rows.retain(|key| key.view != view);
        debug!(view, dropped, "released view");
    }

    pub fn stats(&self) -> CacheStats {
        self.rows.stats()
    }

    /// Records the fingerprint a view is now asking for. A changed
    /// fingerprint starts a new epoch and drops the view's older entries.
    fn observe(&self, scope: &ViewScope, query: &Query, slice: Option<Slice>) -> Ticket {
        let fingerprint = Fingerprint::of(scope, query);
        let mut views = self.lock_views();
        let state = views
            .entry(scope.view_id.clone())
            .or_insert_with(|| ViewState::new(fingerprint.clone(), 0));
        if state.fingerprint != fingerprint {
            let epoch = state.epoch + 1;
            *state = ViewState::new(fingerprint.clone(), epoch);
            let dropped = self
                .rows
                .retain(|key| key.view != scope.view_id || key.fingerprint == fingerprint);
            debug!(view = %scope.view_id, epoch, dropped, "fingerprint changed");
        }
        if slice.is_some() {
            state.latest = slice;
        }
        Ticket {
            fingerprint,
            epoch: state.epoch,
        }
    }

    async fn load(
        &self,
        scope: &ViewScope,
        query: &Query,
        ticket: &Ticket,
        slice: Slice,
    ) -> Result<Arc<Vec<Value>>, PortalError> {
        let key = RequestKey {
            view: scope.view_id.clone(),
            fingerprint: ticket.fingerprint.clone(),
            slice,
        };
        let request = CatalogRequest::rows(scope, query, slice);
        let client = Arc::clone(&self.client);
        let entity = scope.entity;
        self.rows
            .get_or_fetch(&key, move || async move {
                client.fetch_rows(entity, &request).await.map(Arc::new)
            })
            .await
    }

    fn lock_views(&self) -> MutexGuard<'_, HashMap<String, ViewState>> {
        self.views
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
