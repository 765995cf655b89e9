use std::io::{self, Write};

use serde::Serialize;

use crate::cart::{CartItem, CartTotals};
use crate::catalog::{CatalogRequest, Slice};
use crate::codec::QueryCodec;
use crate::domain::{CatalogEntity, PageSize};
use crate::query::{Fingerprint, Query, ViewScope};

/// What a persisted query string turns into.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedQuery {
    pub canonical: String,
    pub query: Query,
    pub fingerprint: Fingerprint,
    pub count_request: CatalogRequest,
    pub page_request: CatalogRequest,
}

impl DecodedQuery {
    /// Decodes `search` for the top-level `entity` collection. `default_results`
    /// sizes the page request when the query has no `results`.
    pub fn new(search: &str, entity: CatalogEntity, default_results: PageSize) -> Self {
        let query = QueryCodec::decode(search);
        let scope = ViewScope::new(entity.collection_path(), entity);
        let slice = Slice::Page {
            page: query.page_or_first(),
            results: query.results_or(default_results),
        };
        Self {
            canonical: QueryCodec::encode(&query),
            fingerprint: Fingerprint::of(&scope, &query),
            count_request: CatalogRequest::count(&scope, &query),
            page_request: CatalogRequest::rows(&scope, &query, slice),
            query,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsReport {
    pub totals: CartTotals,
    pub speed_mbps: u32,
    pub estimated_seconds: u64,
    pub estimated_time: String,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_decoded(result: &DecodedQuery) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cart(items: &[CartItem]) -> io::Result<()> {
        Self::print_json(&items)
    }

    pub fn print_totals(report: &TotalsReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
