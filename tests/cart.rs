mod common;

use std::sync::Arc;

use catalog_portal::cart::{CartAggregator, CartItem, ItemTotals, without_covered};
use catalog_portal::domain::EntityType;
use catalog_portal::download::DownloadClient;

use common::{MockCatalog, MockDownload};

fn aggregator(
    download: &Arc<MockDownload>,
    catalog: &Arc<MockCatalog>,
) -> CartAggregator<MockDownload, MockCatalog> {
    CartAggregator::new(Arc::clone(download), Arc::clone(catalog), 64)
}

#[tokio::test]
async fn failed_item_contributes_zero_and_is_reported() {
    let download = Arc::new(MockDownload::default());
    let catalog = Arc::new(MockCatalog::with_total(0));
    download.fail(EntityType::Investigation, 1);
    catalog.fail_id(1);
    download.set_size(EntityType::Dataset, 2, 5);
    catalog.set_count_for(2, 2);

    let items = vec![
        CartItem::new(EntityType::Investigation, 1, "INV-1"),
        CartItem::new(EntityType::Dataset, 2, "DS-2"),
        CartItem::new(EntityType::Datafile, 3, "file-3.nxs").with_size(3),
    ];
    let totals = aggregator(&download, &catalog).aggregate(&items).await;

    assert_eq!(totals.total_size, 8);
    assert_eq!(totals.total_file_count, 3);
    assert_eq!(totals.unresolved, 1);
    assert_eq!(
        totals.items[0],
        ItemTotals {
            entity_type: EntityType::Investigation,
            entity_id: 1,
            size: None,
            file_count: None,
        }
    );
    assert_eq!(totals.items[2].file_count, Some(1));
}

#[tokio::test]
async fn datafile_without_size_is_looked_up_in_catalog() {
    let download = Arc::new(MockDownload::default());
    let catalog = Arc::new(MockCatalog::with_total(0));
    catalog.set_datafile_size(7, 42);

    let items = vec![CartItem::new(EntityType::Datafile, 7, "file-7.nxs")];
    let totals = aggregator(&download, &catalog).aggregate(&items).await;

    assert_eq!(totals.total_size, 42);
    assert_eq!(totals.total_file_count, 1);
    assert_eq!(totals.unresolved, 0);
    assert_eq!(*download.size_calls.lock().unwrap(), 0);
    assert_eq!(catalog.count_call_count(), 0);
}

#[tokio::test]
async fn failed_lookups_are_retried_and_successes_cached() {
    let download = Arc::new(MockDownload::default());
    let catalog = Arc::new(MockCatalog::with_total(0));
    download.fail(EntityType::Investigation, 1);
    download.set_size(EntityType::Dataset, 2, 5);
    let carts = aggregator(&download, &catalog);

    let items = vec![
        CartItem::new(EntityType::Investigation, 1, "INV-1"),
        CartItem::new(EntityType::Dataset, 2, "DS-2"),
    ];
    let first = carts.aggregate(&items).await;
    assert_eq!(first.unresolved, 1);
    assert_eq!(*download.size_calls.lock().unwrap(), 2);

    let second = carts.aggregate(&items).await;
    assert_eq!(second, first);
    assert_eq!(*download.size_calls.lock().unwrap(), 3);
    assert_eq!(catalog.count_call_count(), 2);
}

#[tokio::test]
async fn duplicate_items_share_one_lookup() {
    let download = Arc::new(MockDownload::default());
    let catalog = Arc::new(MockCatalog::with_total(0));
    download.set_size(EntityType::Dataset, 4, 10);
    catalog.set_count_for(4, 6);

    let item = CartItem::new(EntityType::Dataset, 4, "DS-4");
    let carts = aggregator(&download, &catalog);
    let totals = carts.aggregate(&[item.clone(), item]).await;

    assert_eq!(totals.total_size, 20);
    assert_eq!(totals.total_file_count, 12);
    assert_eq!(*download.size_calls.lock().unwrap(), 1);
    assert_eq!(catalog.count_call_count(), 1);
    assert_eq!(carts.stats().0.inflight_hits, 1);
}

#[tokio::test]
async fn covered_selection_counts_ancestors_once() {
    let download = Arc::new(MockDownload::default());
    let catalog = Arc::new(MockCatalog::with_total(0));
    download.set_size(EntityType::Investigation, 1, 100);
    download.set_size(EntityType::Dataset, 2, 40);

    let investigation = CartItem::new(EntityType::Investigation, 1, "INV-1");
    let dataset =
        CartItem::new(EntityType::Dataset, 2, "DS-2").with_parent(investigation.clone());

    let selection = without_covered(&[investigation, dataset]);
    let totals = aggregator(&download, &catalog).aggregate(&selection).await;

    assert_eq!(totals.items.len(), 1);
    assert_eq!(totals.total_size, 100);
}

#[tokio::test]
async fn empty_cart_sums_to_zero() {
    let download = Arc::new(MockDownload::default());
    let catalog = Arc::new(MockCatalog::with_total(0));

    let totals = aggregator(&download, &catalog).aggregate(&[]).await;
    assert_eq!(totals.total_size, 0);
    assert_eq!(totals.total_file_count, 0);
    assert_eq!(totals.unresolved, 0);
    assert!(totals.items.is_empty());
}

#[tokio::test]
async fn cart_edits_round_trip_through_client() {
    let download = MockDownload::default();
    download
        .add_cart_items(&[(EntityType::Dataset, 2), (EntityType::Datafile, 9)])
        .await
        .unwrap();
    download.remove_cart_item(EntityType::Dataset, 2).await.unwrap();

    let cart = download.fetch_cart().await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].token(), "datafile 9");

    download.remove_all_cart_items().await.unwrap();
    assert!(download.fetch_cart().await.unwrap().is_empty());
}
