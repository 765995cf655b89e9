use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::domain::{CatalogEntity, EntityType, PageSize};
use crate::error::PortalError;
use crate::query::{Query, ViewScope};

/// Part of a collection to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slice {
    Page { page: u32, results: PageSize },
    Window { start: u64, stop: u64 },
}

impl Slice {
    pub fn skip(&self) -> u64 {
        match *self {
            Slice::Page { page, results } => {
                u64::from(page.max(1) - 1) * u64::from(results.get())
            }
            Slice::Window { start, .. } => start,
        }
    }

    pub fn limit(&self) -> u64 {
        match *self {
            Slice::Page { results, .. } => u64::from(results.get()),
            Slice::Window { start, stop } => stop.saturating_sub(start),
        }
    }
}

/// Parameters of one catalog read: a `where` condition per column, the
/// ordered `order` expressions, and the window.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CatalogRequest {
    #[serde(rename = "where")]
    pub where_clause: Map<String, Value>,
    pub order: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
}

impl CatalogRequest {
    /// Count request for the collection selected by `scope` and `query`.
    /// Sort and pagination do not apply.
    pub fn count(scope: &ViewScope, query: &Query) -> Self {
        let mut where_clause = Map::new();
        for (column, filter) in &query.filters {
            where_clause.insert(column.clone(), filter.to_condition());
        }
        for filter in &scope.scope {
            where_clause.insert(filter.column.clone(), json!({ "eq": filter.id }));
        }
        Self {
            where_clause,
            ..Self::default()
        }
    }

    /// Row request for one page or window of the collection.
    pub fn rows(scope: &ViewScope, query: &Query, slice: Slice) -> Self {
        Self {
            order: query.sort.order_clauses(),
            skip: Some(slice.skip()),
            limit: Some(slice.limit()),
            ..Self::count(scope, query)
        }
    }

    /// Number of datafiles below a cart entity.
    pub fn datafile_count(entity_type: EntityType, id: u64) -> Self {
        let (column, include) = match entity_type {
            EntityType::Investigation => ("dataset.investigation.id", r#"{"dataset": "investigation"}"#),
            EntityType::Dataset => ("dataset.id", r#""dataset""#),
            EntityType::Datafile => ("id", ""),
        };
        let mut where_clause = Map::new();
        where_clause.insert(column.to_string(), json!({ "eq": id }));
        Self {
            where_clause,
            include: (!include.is_empty()).then(|| include.to_string()),
            ..Self::default()
        }
    }

    /// Query-string pairs in wire form: one `where` parameter per column and
    /// one JSON-quoted `order` parameter per sort column, primary first.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (column, condition) in &self.where_clause {
            let mut single = Map::new();
            single.insert(column.clone(), condition.clone());
            pairs.push(("where".to_string(), Value::Object(single).to_string()));
        }
        for order in &self.order {
            pairs.push(("order".to_string(), Value::String(order.clone()).to_string()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("skip".to_string(), skip.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(include) = &self.include {
            pairs.push(("include".to_string(), include.clone()));
        }
        pairs
    }
}

/// Read side of the catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn fetch_rows(
        &self,
        entity: CatalogEntity,
        request: &CatalogRequest,
    ) -> Result<Vec<Value>, PortalError>;

    async fn fetch_count(
        &self,
        entity: CatalogEntity,
        request: &CatalogRequest,
    ) -> Result<u64, PortalError>;

    /// Size in bytes of a single datafile.
    async fn fetch_datafile_size(&self, id: u64) -> Result<u64, PortalError>;
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    base_url: String,
}

impl CatalogHttpClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, PortalError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("catalog-portal/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PortalError::CatalogHttp(err.to_string()))?,
        );
        if let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|err| PortalError::CatalogHttp(err.to_string()))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| PortalError::CatalogHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str, pairs: &[(String, String)]) -> Result<Response, PortalError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(pairs)
            .send()
            .await
            .map_err(|err| PortalError::CatalogHttp(err.to_string()))?;
        check_status(response).await
    }
}

#[async_trait]
impl CatalogClient for CatalogHttpClient {
    async fn fetch_rows(
        &self,
        entity: CatalogEntity,
        request: &CatalogRequest,
    ) -> Result<Vec<Value>, PortalError> {
        let response = self
            .get(entity.collection_path(), &request.query_pairs())
            .await?;
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|err| PortalError::Decode(err.to_string()))
    }

    async fn fetch_count(
        &self,
        entity: CatalogEntity,
        request: &CatalogRequest,
    ) -> Result<u64, PortalError> {
        let path = format!("{}/count", entity.collection_path());
        let response = self.get(&path, &request.query_pairs()).await?;
        response
            .json::<u64>()
            .await
            .map_err(|err| PortalError::Decode(err.to_string()))
    }

    async fn fetch_datafile_size(&self, id: u64) -> Result<u64, PortalError> {
        let path = format!("{}/{id}", CatalogEntity::Datafile.collection_path());
        let response = self.get(&path, &[]).await?;
        let body = response
            .json::<Value>()
            .await
            .map_err(|err| PortalError::Decode(err.to_string()))?;
        body.get("fileSize")
            .and_then(Value::as_u64)
            .ok_or_else(|| PortalError::Decode(format!("datafile {id} has no fileSize")))
    }
}

async fn check_status(response: Response) -> Result<Response, PortalError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "catalog request failed".to_string());
    Err(PortalError::CatalogStatus { status, message })
}
