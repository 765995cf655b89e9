//! One view wired to the shared store, row orchestrator and count resolver.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::catalog::CatalogClient;
use crate::config::PortalConfig;
use crate::counts::{ChildCount, CountResolver};
use crate::debounce::Debouncer;
use crate::domain::Direction;
use crate::error::PortalError;
use crate::fetch::{Collection, FetchOrchestrator, Fetched};
use crate::filter::{FilterSpec, TextMatch};
use crate::query::{Query, ViewScope};
use crate::store::{QueryStore, UpdateMethod};

/// A page as shown to the user, with the total used to clamp it. `total`
/// is `None` when the count could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub query: Query,
    pub total: Option<u64>,
    pub collection: Collection,
    /// Page originally requested when it was past the end and got clamped.
    pub clamped_from: Option<u32>,
}

pub struct ViewSession<C> {
    scope: ViewScope,
    store: Arc<QueryStore>,
    rows: Arc<FetchOrchestrator<C>>,
    counts: Arc<CountResolver<C>>,
    debounce: Duration,
    debouncers: Mutex<HashMap<String, Arc<Debouncer>>>,
}

impl<C: CatalogClient> ViewSession<C> {
    pub fn new(
        scope: ViewScope,
        store: Arc<QueryStore>,
        rows: Arc<FetchOrchestrator<C>>,
        counts: Arc<CountResolver<C>>,
        debounce: Duration,
    ) -> Self {
        Self {
            scope,
            store,
            rows,
            counts,
            debounce,
            debouncers: Mutex::new(HashMap::new()),
        }
    }

    /// Session with its own orchestrator and resolver sized from `config`.
    pub fn from_config(
        scope: ViewScope,
        store: Arc<QueryStore>,
        client: Arc<C>,
        config: &PortalConfig,
    ) -> Self {
        let rows = FetchOrchestrator::new(
            Arc::clone(&client),
            config.cache_capacity,
            config.default_results,
        );
        let counts = CountResolver::new(client, config.cache_capacity);
        Self::new(scope, store, Arc::new(rows), Arc::new(counts), config.debounce)
    }

    pub fn scope(&self) -> &ViewScope {
        &self.scope
    }

    pub fn store(&self) -> &QueryStore {
        &self.store
    }

    pub fn changes(&self) -> watch::Receiver<Query> {
        self.store.subscribe()
    }

    /// Loads the current page and its total together. When the page lies
    /// past the last one, the store is clamped in place and the last page is
    /// fetched instead. A failed count leaves the page unclamped and without
    /// a total.
    pub async fn load_page(&self) -> Result<Fetched<PageView>, PortalError> {
        let query = self.store.snapshot();
        let (count, page) = futures::join!(
            self.counts.fetch_count(&self.scope, &query),
            self.rows.fetch_page(&self.scope, &query)
        );
        let total = match count {
            Ok(Fetched::Current(total)) => Some(total),
            Ok(Fetched::Superseded) => return Ok(Fetched::Superseded),
            Err(err) => {
                warn!(view = %self.scope.view_id, error = %err, "showing page without total");
                None
            }
        };
        if self.store.snapshot() != query {
            debug!(view = %self.scope.view_id, "query changed while loading page");
            return Ok(Fetched::Superseded);
        }

        let requested = query.page_or_first();
        let clamped_to =
            total.and_then(|total| self.store.clamp_page(total, self.rows.default_results()));
        if let Some(last) = clamped_to {
            debug!(view = %self.scope.view_id, requested, last, "reloading clamped page");
            let clamped = self.store.snapshot();
            let page = self.rows.fetch_page(&self.scope, &clamped).await?;
            return Ok(page.map(|collection| PageView {
                query: clamped,
                total,
                collection,
                clamped_from: Some(requested),
            }));
        }

        Ok(page?.map(|collection| PageView {
            query,
            total,
            collection,
            clamped_from: None,
        }))
    }

    /// Ensures `range` of the infinite list is loaded.
    pub async fn load_window(&self, range: Range<u64>) -> Result<Fetched<Collection>, PortalError> {
        let query = self.store.snapshot();
        self.rows.fetch_window(&self.scope, &query, range).await
    }

    /// Rows of the infinite list loaded so far.
    pub fn loaded_rows(&self) -> Vec<serde_json::Value> {
        self.rows.loaded_rows(&self.scope.view_id)
    }

    pub async fn load_count(&self) -> Result<Fetched<u64>, PortalError> {
        let query = self.store.snapshot();
        self.counts.fetch_count(&self.scope, &query).await
    }

    pub async fn load_child_counts(
        &self,
        child: &ChildCount,
        row_ids: &[u64],
    ) -> Vec<(u64, Result<Fetched<u64>, PortalError>)> {
        let query = self.store.snapshot();
        self.counts
            .fetch_child_counts(&self.scope, &query, child, row_ids)
            .await
    }

    /// Text typed into a column filter. Applied once that column's input has
    /// been quiet for the debounce period; returns whether this keystroke was
    /// the one applied. Columns are debounced independently.
    pub async fn type_filter(&self, column: &str, text: &str, match_type: TextMatch) -> bool {
        let filter = FilterSpec::Text {
            value: text.to_string(),
            match_type,
        };
        let debouncer = self.debouncer_for(column);
        match debouncer.settle(filter).await {
            Some(filter) => {
                self.store.set_filter(column, Some(filter), UpdateMethod::Push);
                true
            }
            None => false,
        }
    }

    /// Column header click: cycles the column's direction.
    pub fn click_sort(&self, column: &str, additive: bool) -> Option<Direction> {
        self.store.cycle_sort(column, additive, UpdateMethod::Push)
    }

    /// Drops this view's cached rows and counts, and any filter input still
    /// waiting out its quiet period.
    pub fn release(&self) {
        self.rows.release_view(&self.scope.view_id);
        self.counts.release_view(&self.scope.view_id);
        for debouncer in self.lock_debouncers().values() {
            debouncer.cancel();
        }
    }

    fn debouncer_for(&self, column: &str) -> Arc<Debouncer> {
        let mut debouncers = self.lock_debouncers();
        let debouncer = debouncers
            .entry(column.to_string())
            .or_insert_with(|| Arc::new(Debouncer::new(self.debounce)));
        Arc::clone(debouncer)
    }

    fn lock_debouncers(&self) -> MutexGuard<'_, HashMap<String, Arc<Debouncer>>> {
        self.debouncers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
