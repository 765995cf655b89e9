mod common;

use std::sync::Arc;

use serde_json::json;

use catalog_portal::catalog::{CatalogRequest, Slice};
use catalog_portal::codec::QueryCodec;
use catalog_portal::domain::{CatalogEntity, Direction, PageSize};
use catalog_portal::fetch::FetchOrchestrator;
use catalog_portal::filter::{FilterSpec, SortOrder};
use catalog_portal::output::DecodedQuery;
use catalog_portal::query::{Query, ViewScope};
use catalog_portal::store::QueryStore;

use common::MockCatalog;

fn dog_query() -> Query {
    Query::new()
        .with_filter("title", FilterSpec::includes("dog"))
        .with_sort(SortOrder::from_pairs([("startDate", Direction::Asc)]))
        .with_page(2)
        .with_results(PageSize::try_from(20).unwrap())
}

#[test]
fn location_round_trips_to_the_same_query() {
    let query = dog_query();
    let location = QueryCodec::encode(&query);

    assert!(location.starts_with("page=2&results=20&filters="));
    assert!(location.ends_with("&sort=startDate%3Aasc"));
    assert_eq!(QueryCodec::decode(&location), query);
}

#[test]
fn query_translates_to_catalog_parameters() {
    let scope = ViewScope::new("investigations", CatalogEntity::Investigation);
    let query = dog_query();
    let slice = Slice::Page {
        page: query.page_or_first(),
        results: query.results_or(PageSize::DEFAULT),
    };

    let request = CatalogRequest::rows(&scope, &query, slice);
    assert_eq!(request.where_clause["title"], json!({ "like": "dog" }));
    assert_eq!(request.order, vec!["startDate asc"]);
    assert_eq!((request.skip, request.limit), (Some(20), Some(20)));

    let pairs = CatalogRequest::count(&scope, &query).query_pairs();
    assert_eq!(
        pairs,
        vec![("where".to_string(), r#"{"title":{"like":"dog"}}"#.to_string())]
    );
}

#[tokio::test]
async fn store_location_drives_the_row_request() {
    let catalog = Arc::new(MockCatalog::with_total(100));
    let rows = FetchOrchestrator::new(Arc::clone(&catalog), 16, PageSize::DEFAULT);
    let scope = ViewScope::new("investigations", CatalogEntity::Investigation);
    let store = QueryStore::from_location(&QueryCodec::encode(&dog_query()));

    let page = rows
        .fetch_page(&scope, &store.snapshot())
        .await
        .unwrap()
        .current()
        .unwrap();
    assert_eq!(page.offset, 20);
    assert_eq!(page.len(), 20);
    assert_eq!(page.rows[0]["title"], "dog-20");

    let request = catalog.row_calls.lock().unwrap()[0].clone();
    assert_eq!(request.where_clause["title"], json!({ "like": "dog" }));
    assert_eq!(request.order, vec!["startDate asc"]);
    assert_eq!((request.skip, request.limit), (Some(20), Some(20)));
}

#[test]
fn decoded_report_uses_configured_page_size() {
    let thirty = PageSize::try_from(30).unwrap();

    let r#unsized = DecodedQuery::new("page=2", CatalogEntity::Investigation, thirty);
    assert_eq!(
        (r#unsized.page_request.skip, r#unsized.page_request.limit),
        (Some(30), Some(30))
    );
    assert_eq!(r#unsized.count_request.limit, None);

    let sized = DecodedQuery::new("?page=2&results=20", CatalogEntity::Investigation, thirty);
    assert_eq!(sized.canonical, "page=2&results=20");
    assert_eq!(
        (sized.page_request.skip, sized.page_request.limit),
        (Some(20), Some(20))
    );
}
