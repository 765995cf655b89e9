//! Address-bar representation of a [`Query`].
//!
//! Parameters are written in a fixed order so that equal queries always
//! produce the same string. Column filters travel as one JSON object under
//! `filters`; the sort order is a repeated `sort=<column>:<direction>`
//! parameter whose repetition order is the sort precedence.
//!
//! Decoding is lenient: fragments that cannot be understood are dropped and
//! never reported as errors.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde_json::Value;

use crate::domain::{Direction, EntityType, PageSize, ViewMode};
use crate::filter::{DATE_FORMAT, FilterSpec, SortOrder, parse_date};
use crate::query::{Query, SearchParams, SearchScope};

const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub struct QueryCodec;

impl QueryCodec {
    /// Serializes a query without the leading `?`. An empty query encodes to
    /// an empty string.
    pub fn encode(query: &Query) -> String {
        let query = query.clone().normalized();
        let search = &query.search;
        let mut pairs: Vec<(&str, String)> = Vec::new();

        if let Some(view) = query.view {
            pairs.push(("view", view.as_str().to_string()));
        }
        if let Some(text) = &search.search {
            pairs.push(("search", text.clone()));
        }
        if let Some(text) = &search.search_text {
            pairs.push(("searchText", text.clone()));
        }
        if !search.scope.investigation {
            pairs.push(("investigation", "false".to_string()));
        }
        if !search.scope.dataset {
            pairs.push(("dataset", "false".to_string()));
        }
        if !search.scope.datafile {
            pairs.push(("datafile", "false".to_string()));
        }
        if let Some(date) = search.start_date {
            pairs.push(("startDate", date.format(DATE_FORMAT).to_string()));
        }
        if let Some(date) = search.end_date {
            pairs.push(("endDate", date.format(DATE_FORMAT).to_string()));
        }
        if let Some(tab) = search.current_tab {
            pairs.push(("currentTab", tab.as_str().to_string()));
        }
        if let Some(page) = query.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(results) = query.results {
            pairs.push(("results", results.to_string()));
        }
        if !query.filters.is_empty() {
            let filters: serde_json::Map<String, Value> = query
                .filters
                .iter()
                .map(|(column, filter)| (column.clone(), filter.to_persisted()))
                .collect();
            pairs.push(("filters", Value::Object(filters).to_string()));
        }
        for (column, direction) in query.sort.iter() {
            pairs.push(("sort", format!("{column}:{direction}")));
        }

        pairs
            .into_iter()
            .map(|(key, value)| format!("{key}={}", utf8_percent_encode(&value, QUERY_VALUE)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Best-effort parse of a persisted query string, with or without the
    /// leading `?`.
    pub fn decode(input: &str) -> Query {
        let input = input.trim().trim_start_matches('?');
        let mut first_values: BTreeMap<String, String> = BTreeMap::new();
        let mut sort_pairs: Vec<(String, Direction)> = Vec::new();

        for fragment in input.split('&').filter(|fragment| !fragment.is_empty()) {
            let (raw_key, raw_value) = fragment.split_once('=').unwrap_or((fragment, ""));
            let Some(key) = decode_component(raw_key) else {
                continue;
            };
            let Some(value) = decode_component(raw_value) else {
                continue;
            };
            if key == "sort" {
                if let Some(pair) = parse_sort_fragment(&value) {
                    sort_pairs.push(pair);
                }
                continue;
            }
            first_values.entry(key).or_insert(value);
        }

        let get = |key: &str| first_values.get(key).map(String::as_str);

        let search = SearchParams {
            search: get("search").filter(|text| !text.is_empty()).map(str::to_string),
            search_text: get("searchText")
                .filter(|text| !text.is_empty())
                .map(str::to_string),
            start_date: get("startDate").and_then(parse_date),
            end_date: get("endDate").and_then(parse_date),
            scope: SearchScope {
                investigation: get("investigation") != Some("false"),
                dataset: get("dataset") != Some("false"),
                datafile: get("datafile") != Some("false"),
            },
            current_tab: get("currentTab").and_then(|tab| tab.parse::<EntityType>().ok()),
        };

        Query {
            filters: get("filters").map(parse_filters).unwrap_or_default(),
            sort: SortOrder::from_pairs(sort_pairs),
            page: get("page")
                .and_then(|page| page.trim().parse::<u32>().ok())
                .filter(|page| *page >= 1),
            results: get("results").and_then(|results| results.parse::<PageSize>().ok()),
            view: get("view").and_then(|view| view.parse::<ViewMode>().ok()),
            search,
        }
    }
}

fn decode_component(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|value| value.into_owned())
}

fn parse_sort_fragment(value: &str) -> Option<(String, Direction)> {
    let (column, direction) = value.rsplit_once(':')?;
    if column.is_empty() {
        return None;
    }
    let direction = direction.parse::<Direction>().ok()?;
    Some((column.to_string(), direction))
}

fn parse_filters(raw: &str) -> BTreeMap<String, FilterSpec> {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw) else {
        return BTreeMap::new();
    };
    object
        .iter()
        .filter(|(column, _)| !column.is_empty())
        .filter_map(|(column, value)| {
            FilterSpec::from_persisted(value).map(|filter| (column.clone(), filter))
        })
        .collect()
}
