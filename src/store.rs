//! Single-writer owner of the current [`Query`] and its navigation history.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::debug;

use crate::codec::QueryCodec;
use crate::domain::{Direction, PageSize, ViewMode};
use crate::filter::FilterSpec;
use crate::query::{Query, SearchParams};

/// Whether a mutation creates a navigable history entry or overwrites the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMethod {
    Push,
    Replace,
}

#[derive(Debug)]
struct History {
    entries: Vec<String>,
    cursor: usize,
    query: Query,
}

#[derive(Debug)]
pub struct QueryStore {
    history: Mutex<History>,
    sender: watch::Sender<Query>,
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryStore {
    pub fn new() -> Self {
        Self::from_location("")
    }

    /// Hydrates a store from a persisted query string.
    pub fn from_location(search: &str) -> Self {
        let query = QueryCodec::decode(search);
        let entry = QueryCodec::encode(&query);
        let (sender, _) = watch::channel(query.clone());
        Self {
            history: Mutex::new(History {
                entries: vec![entry],
                cursor: 0,
                query,
            }),
            sender,
        }
    }

    pub fn snapshot(&self) -> Query {
        self.lock().query.clone()
    }

    /// Persisted string of the current history entry.
    pub fn location(&self) -> String {
        let history = self.lock();
        history.entries[history.cursor].clone()
    }

    pub fn history_len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Receives the latest query after every change; intermediate values may
    /// be skipped by slow subscribers.
    pub fn subscribe(&self) -> watch::Receiver<Query> {
        self.sender.subscribe()
    }

    /// Re-reads the query from a persisted string on navigation entry. The
    /// current history entry is rewritten in canonical form.
    pub fn load(&self, search: &str) {
        let query = QueryCodec::decode(search);
        let mut history = self.lock();
        let cursor = history.cursor;
        history.entries[cursor] = QueryCodec::encode(&query);
        history.query = query.clone();
        self.sender.send_replace(query);
    }

    pub fn back(&self) -> bool {
        self.navigate(-1)
    }

    pub fn forward(&self) -> bool {
        self.navigate(1)
    }

    /// Sets or clears one column filter. A change of filter returns the view
    /// to its first page.
    pub fn set_filter(&self, column: &str, filter: Option<FilterSpec>, method: UpdateMethod) -> bool {
        let filter = filter.and_then(FilterSpec::normalized);
        self.update(method, |query| {
            if query.filters.get(column) == filter.as_ref() {
                return;
            }
            match filter {
                Some(filter) => {
                    query.filters.insert(column.to_string(), filter);
                }
                None => {
                    query.filters.remove(column);
                }
            }
            query.page = None;
        })
    }

    /// Sets one column's sort direction. Non-additive updates replace the
    /// whole order; additive updates keep the other columns in place.
    pub fn set_sort(
        &self,
        column: &str,
        direction: Option<Direction>,
        additive: bool,
        method: UpdateMethod,
    ) -> bool {
        self.update(method, |query| {
            if additive {
                query.sort.set_additive(column, direction);
            } else {
                query.sort.set_only(column, direction);
            }
        })
    }

    /// Advances a column through absent -> asc -> desc -> absent and returns
    /// its new direction.
    pub fn cycle_sort(&self, column: &str, additive: bool, method: UpdateMethod) -> Option<Direction> {
        let next = Direction::cycle(self.lock().query.sort.get(column));
        self.set_sort(column, next, additive, method);
        next
    }

    pub fn set_page(&self, page: u32, method: UpdateMethod) -> bool {
        self.update(method, |query| {
            query.page = (page >= 1).then_some(page);
        })
    }

    /// Changes the page size; the page position is reset.
    pub fn set_results(&self, results: PageSize, method: UpdateMethod) -> bool {
        self.update(method, |query| {
            if query.results != Some(results) {
                query.results = Some(results);
                query.page = None;
            }
        })
    }

    pub fn set_view(&self, view: Option<ViewMode>, method: UpdateMethod) -> bool {
        self.update(method, |query| {
            query.view = view;
        })
    }

    /// Replaces the search parameters; a change returns the view to its
    /// first page.
    pub fn set_search(&self, search: SearchParams, method: UpdateMethod) -> bool {
        self.update(method, |query| {
            if query.search != search {
                query.search = search;
                query.page = None;
            }
        })
    }

    /// Pulls the page back to the last one that holds rows once the total
    /// is known. Returns the clamped page when a change was made.
    pub fn clamp_page(&self, total: u64, default_results: PageSize) -> Option<u32> {
        let query = self.snapshot();
        let last = last_page(total, query.results_or(default_results));
        if query.page_or_first() <= last {
            return None;
        }
        debug!(page = query.page_or_first(), last, total, "clamping page");
        self.update(UpdateMethod::Replace, |query| {
            query.page = Some(last);
        });
        Some(last)
    }

    /// Single mutation entry point. Returns `false` when the mutation left
    /// the query structurally unchanged, in which case history is untouched.
    fn update(&self, method: UpdateMethod, mutate: impl FnOnce(&mut Query)) -> bool {
        let mut history = self.lock();
        let mut next = history.query.clone();
        mutate(&mut next);
        let next = next.normalized();
        if next == history.query {
            return false;
        }

        let entry = QueryCodec::encode(&next);
        match method {
            UpdateMethod::Push => {
                let keep = history.cursor + 1;
                history.entries.truncate(keep);
                history.entries.push(entry);
                history.cursor = keep;
            }
            UpdateMethod::Replace => {
                let cursor = history.cursor;
                history.entries[cursor] = entry;
            }
        }
        history.query = next.clone();
        self.sender.send_replace(next);
        true
    }

    fn navigate(&self, step: isize) -> bool {
        let mut history = self.lock();
        let Some(cursor) = history.cursor.checked_add_signed(step) else {
            return false;
        };
        if cursor >= history.entries.len() {
            return false;
        }
        history.cursor = cursor;
        let query = QueryCodec::decode(&history.entries[cursor]);
        history.query = query.clone();
        self.sender.send_replace(query);
        true
    }

    fn lock(&self) -> MutexGuard<'_, History> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Last page holding rows for `total` rows; an empty collection still has
/// page 1.
pub fn last_page(total: u64, results: PageSize) -> u32 {
    let results = u64::from(results.get());
    let pages = total.div_ceil(results).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_page_rounds_up() {
        let ten = PageSize::try_from(10).unwrap();
        assert_eq!(last_page(25, ten), 3);
        assert_eq!(last_page(30, ten), 3);
        assert_eq!(last_page(0, ten), 1);
    }

    #[test]
    fn replace_keeps_history_length() {
        let store = QueryStore::new();
        store.set_page(2, UpdateMethod::Replace);
        assert_eq!(store.history_len(), 1);
        assert_eq!(store.location(), "page=2");
    }

    #[test]
    fn push_after_back_drops_forward_entries() {
        let store = QueryStore::new();
        store.set_page(2, UpdateMethod::Push);
        store.set_page(3, UpdateMethod::Push);
        assert!(store.back());
        store.set_page(5, UpdateMethod::Push);
        assert_eq!(store.history_len(), 3);
        assert!(!store.forward());
        assert_eq!(store.snapshot().page, Some(5));
    }
}
