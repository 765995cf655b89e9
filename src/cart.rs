//! Download cart items and the size / file-count aggregation over them.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheStats, FailurePolicy, RequestCache};
use crate::catalog::{CatalogClient, CatalogRequest};
use crate::domain::{CatalogEntity, EntityType};
use crate::download::DownloadClient;
use crate::error::PortalError;

/// One entity selected for download. `parent_entities` is the ancestor
/// chain, nearest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub entity_id: u64,
    pub entity_type: EntityType,
    #[serde(rename = "name")]
    pub display_id: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub parent_entities: Vec<CartItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl CartItem {
    pub fn new(entity_type: EntityType, entity_id: u64, display_id: impl Into<String>) -> Self {
        Self {
            entity_id,
            entity_type,
            display_id: display_id.into(),
            id: None,
            parent_entities: Vec::new(),
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_parent(mut self, parent: CartItem) -> Self {
        self.parent_entities.push(parent);
        self
    }

    /// Whether an ancestor of this item is itself part of `selection`.
    pub fn is_covered_by(&self, selection: &[CartItem]) -> bool {
        self.parent_entities.iter().any(|parent| {
            selection.iter().any(|selected| {
                selected.entity_type == parent.entity_type && selected.entity_id == parent.entity_id
            })
        })
    }

    /// Token used by the download service to name the item, e.g. `dataset 4`.
    pub fn token(&self) -> String {
        format!("{} {}", self.entity_type, self.entity_id)
    }
}

/// Items whose ancestors are not also in the selection.
pub fn without_covered(items: &[CartItem]) -> Vec<CartItem> {
    items
        .iter()
        .filter(|item| !item.is_covered_by(items))
        .cloned()
        .collect()
}

/// Server-side cart of one user at one facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadCart {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub facility_name: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub cart_items: Vec<CartItem>,
}

/// Resolved figures for one cart item; `None` where resolution failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTotals {
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub size: Option<u64>,
    pub file_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub total_size: u64,
    pub total_file_count: u64,
    /// Items for which at least one figure could not be resolved.
    pub unresolved: usize,
    pub items: Vec<ItemTotals>,
}

pub struct CartAggregator<D, C> {
    download: Arc<D>,
    catalog: Arc<C>,
    sizes: RequestCache<(EntityType, u64), u64>,
    file_counts: RequestCache<(EntityType, u64), u64>,
}

impl<D, C> CartAggregator<D, C>
where
    D: DownloadClient,
    C: CatalogClient,
{
    pub fn new(download: Arc<D>, catalog: Arc<C>, capacity: usize) -> Self {
        Self {
            download,
            catalog,
            sizes: RequestCache::new(capacity, FailurePolicy::Evict),
            file_counts: RequestCache::new(capacity, FailurePolicy::Evict),
        }
    }

    /// Sums size and file count over exactly the given items. Every item is
    /// resolved concurrently and the call waits for all of them; an item
    /// that fails contributes zero and is reported in `unresolved`.
    pub async fn aggregate(&self, items: &[CartItem]) -> CartTotals {
        let resolved = join_all(items.iter().map(|item| self.resolve(item))).await;

        let mut totals = CartTotals::default();
        for item in resolved {
            totals.total_size += item.size.unwrap_or(0);
            totals.total_file_count += item.file_count.unwrap_or(0);
            if item.size.is_none() || item.file_count.is_none() {
                totals.unresolved += 1;
            }
            totals.items.push(item);
        }
        debug!(
            items = items.len(),
            total_size = totals.total_size,
            total_file_count = totals.total_file_count,
            unresolved = totals.unresolved,
            "aggregated cart"
        );
        totals
    }

    pub async fn resolve(&self, item: &CartItem) -> ItemTotals {
        let (size, file_count) = futures::join!(self.size_of(item), self.file_count_of(item));
        ItemTotals {
            entity_type: item.entity_type,
            entity_id: item.entity_id,
            size: logged(item, "size", size),
            file_count: logged(item, "file count", file_count),
        }
    }

    pub fn stats(&self) -> (CacheStats, CacheStats) {
        (self.sizes.stats(), self.file_counts.stats())
    }

    async fn size_of(&self, item: &CartItem) -> Result<u64, PortalError> {
        if let (EntityType::Datafile, Some(size)) = (item.entity_type, item.size) {
            return Ok(size);
        }
        let key = (item.entity_type, item.entity_id);
        let download = Arc::clone(&self.download);
        let catalog = Arc::clone(&self.catalog);
        self.sizes
            .get_or_fetch(&key, move || async move {
                match key.0 {
                    EntityType::Datafile => catalog.fetch_datafile_size(key.1).await,
                    EntityType::Investigation | EntityType::Dataset => {
                        download.get_size(key.0, key.1).await
                    }
                }
            })
            .await
    }

    async fn file_count_of(&self, item: &CartItem) -> Result<u64, PortalError> {
        if item.entity_type == EntityType::Datafile {
            return Ok(1);
        }
        let key = (item.entity_type, item.entity_id);
        let catalog = Arc::clone(&self.catalog);
        self.file_counts
            .get_or_fetch(&key, move || async move {
                let request = CatalogRequest::datafile_count(key.0, key.1);
                catalog.fetch_count(CatalogEntity::Datafile, &request).await
            })
            .await
    }
}

fn logged(item: &CartItem, figure: &str, result: Result<u64, PortalError>) -> Option<u64> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(
                entity = %item.entity_type,
                entity_id = item.entity_id,
                figure,
                error = %err,
                "cart item resolution failed"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cart_item_wire_shape() {
        let json = r#"{"entityId": 4, "entityType": "dataset", "id": 11, "name": "DS-4", "parentEntities": []}"#;
        let item: CartItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.entity_type, EntityType::Dataset);
        assert_eq!(item.display_id, "DS-4");
        assert_eq!(item.id, Some(11));
        assert_eq!(item.token(), "dataset 4");
    }

    #[test]
    fn covered_items_are_dropped() {
        let investigation = CartItem::new(EntityType::Investigation, 1, "INV-1");
        let dataset = CartItem::new(EntityType::Dataset, 2, "DS-2").with_parent(investigation.clone());
        let orphan = CartItem::new(EntityType::Dataset, 3, "DS-3")
            .with_parent(CartItem::new(EntityType::Investigation, 9, "INV-9"));

        let kept = without_covered(&[investigation.clone(), dataset, orphan.clone()]);
        assert_eq!(kept, vec![investigation, orphan]);
    }
}
