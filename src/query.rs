//! The per-view query value and the fingerprint derived from it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Value, json};

use crate::domain::{CatalogEntity, EntityType, PageSize, ViewMode};
use crate::filter::{DATE_FORMAT, FilterSpec, SortOrder};

/// Entity kinds included in a global search. All are on unless switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchScope {
    pub investigation: bool,
    pub dataset: bool,
    pub datafile: bool,
}

impl Default for SearchScope {
    fn default() -> Self {
        Self {
            investigation: true,
            dataset: true,
            datafile: true,
        }
    }
}

/// Free-text and global search parameters, orthogonal to column filters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub search: Option<String>,
    pub search_text: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub scope: SearchScope,
    pub current_tab: Option<EntityType>,
}

/// Immutable query state of one view.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Query {
    pub filters: BTreeMap<String, FilterSpec>,
    pub sort: SortOrder,
    pub page: Option<u32>,
    pub results: Option<PageSize>,
    pub view: Option<ViewMode>,
    pub search: SearchParams,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, column: impl Into<String>, filter: FilterSpec) -> Self {
        let column = column.into();
        match filter.normalized() {
            Some(filter) => {
                self.filters.insert(column, filter);
            }
            None => {
                self.filters.remove(&column);
            }
        }
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = (page >= 1).then_some(page);
        self
    }

    pub fn with_results(mut self, results: PageSize) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_view(mut self, view: ViewMode) -> Self {
        self.view = Some(view);
        self
    }

    pub fn with_search(mut self, search: SearchParams) -> Self {
        self.search = search;
        self
    }

    /// Current page, treating an absent page as the first.
    pub fn page_or_first(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn results_or(&self, default: PageSize) -> PageSize {
        self.results.unwrap_or(default)
    }

    /// Drops no-op filters and out-of-range values so structurally equal
    /// queries compare equal.
    pub fn normalized(mut self) -> Self {
        self.filters = std::mem::take(&mut self.filters)
            .into_iter()
            .filter_map(|(column, filter)| filter.normalized().map(|filter| (column, filter)))
            .collect();
        self.page = self.page.filter(|page| *page >= 1);
        self.search.search = self.search.search.filter(|text| !text.is_empty());
        self.search.search_text = self.search.search_text.filter(|text| !text.is_empty());
        self
    }
}

/// Scoping condition fixed by the view, such as the parent investigation id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ScopeFilter {
    pub column: String,
    pub id: u64,
}

/// Identity of a view and the fixed parameters that scope its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ViewScope {
    pub view_id: String,
    pub entity: CatalogEntity,
    pub scope: Vec<ScopeFilter>,
}

impl ViewScope {
    pub fn new(view_id: impl Into<String>, entity: CatalogEntity) -> Self {
        Self {
            view_id: view_id.into(),
            entity,
            scope: Vec::new(),
        }
    }

    pub fn scoped_by(mut self, column: impl Into<String>, id: u64) -> Self {
        self.scope.push(ScopeFilter {
            column: column.into(),
            id,
        });
        self
    }
}

/// Canonical text of everything that decides which rows belong to a
/// collection. Pagination is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(scope: &ViewScope, query: &Query) -> Self {
        let filters: serde_json::Map<String, Value> = query
            .filters
            .iter()
            .map(|(column, filter)| (column.clone(), filter.to_persisted()))
            .collect();
        let sort: Vec<Value> = query
            .sort
            .iter()
            .map(|(column, direction)| json!([column, direction.as_str()]))
            .collect();
        let scope_filters: Vec<Value> = scope
            .scope
            .iter()
            .map(|filter| json!([filter.column, filter.id]))
            .collect();
        let search = &query.search;
        let canonical = json!({
            "entity": scope.entity.as_str(),
            "scope": scope_filters,
            "filters": filters,
            "sort": sort,
            "search": search.search,
            "searchText": search.search_text,
            "startDate": search.start_date.map(|date| date.format(DATE_FORMAT).to_string()),
            "endDate": search.end_date.map(|date| date.format(DATE_FORMAT).to_string()),
            "searchScope": [search.scope.investigation, search.scope.dataset, search.scope.datafile],
            "currentTab": search.current_tab.map(|tab| tab.as_str()),
        });
        Fingerprint(canonical.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
