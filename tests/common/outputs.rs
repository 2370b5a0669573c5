//! Fake service output: STAC items and catalogs written into a work item's output
//! namespace the way a service runner leaves them.

#![allow(dead_code)]

use serde_json::{json, Value};

use granule_orchestrator::catalog::{write_json, ObjectStore};
use granule_orchestrator::constants::artifacts;
use granule_orchestrator::models::WorkItem;

use super::harness::ARTIFACT_ROOT;

/// Href of the data asset produced for `granule_id`
pub fn data_href(granule_id: &str) -> String {
    format!("s3://granule-outputs/{granule_id}.tif")
}

pub fn stac_item(granule_id: &str) -> Value {
    json!({
        "id": granule_id,
        "bbox": [-180.0, -90.0, 180.0, 90.0],
        "properties": {
            "start_datetime": "2020-01-01T00:00:00Z",
            "end_datetime": "2020-01-01T01:59:59Z"
        },
        "assets": {
            "data": {
                "href": data_href(granule_id),
                "type": "image/tiff",
                "title": format!("{granule_id}.tif"),
                "roles": ["data"]
            }
        },
        "links": []
    })
}

/// Write one catalog named `file_name` holding an item per granule, returning its
/// location. Item links are relative to the catalog.
pub async fn write_catalog(
    store: &dyn ObjectStore,
    item: &WorkItem,
    file_name: &str,
    granule_ids: &[String],
) -> String {
    let mut links = Vec::with_capacity(granule_ids.len());
    for granule_id in granule_ids {
        let item_file = format!("{granule_id}.json");
        write_json(
            store,
            &item.output_location(ARTIFACT_ROOT, &item_file),
            &stac_item(granule_id),
        )
        .await
        .unwrap();
        links.push(json!({ "href": format!("./{item_file}"), "rel": "item", "type": "application/json" }));
    }

    let catalog = json!({
        "stac_version": "1.0.0-beta.2",
        "id": format!("catalog-{}-{file_name}", item.id),
        "description": "Service output",
        "links": links
    });
    let location = item.output_location(ARTIFACT_ROOT, file_name);
    write_json(store, &location, &catalog).await.unwrap();
    location
}

/// Output of a service item: a single `catalog.json` with the given granules
pub async fn write_service_output(
    store: &dyn ObjectStore,
    item: &WorkItem,
    granule_ids: &[String],
) -> Vec<String> {
    vec![write_catalog(store, item, "catalog.json", granule_ids).await]
}

/// Output of a discovery page: `catalog{N}.json` per granule
pub async fn write_discovery_page(
    store: &dyn ObjectStore,
    item: &WorkItem,
    granule_ids: &[String],
) -> Vec<String> {
    let mut catalogs = Vec::with_capacity(granule_ids.len());
    for (index, granule_id) in granule_ids.iter().enumerate() {
        catalogs.push(
            write_catalog(
                store,
                item,
                &format!("catalog{index}.json"),
                std::slice::from_ref(granule_id),
            )
            .await,
        );
    }
    catalogs
}

/// Output of a service item that split its results into batches: `catalog{N}.json`
/// per batch plus the `batch-catalogs.json` index listing them, and no `catalog.json`
pub async fn write_batched_output(
    store: &dyn ObjectStore,
    item: &WorkItem,
    batches: &[Vec<String>],
) -> Vec<String> {
    let mut catalogs = Vec::with_capacity(batches.len());
    let mut file_names = Vec::with_capacity(batches.len());
    for (index, granule_ids) in batches.iter().enumerate() {
        let file_name = format!("catalog{index}.json");
        catalogs.push(write_catalog(store, item, &file_name, granule_ids).await);
        file_names.push(file_name);
    }
    write_json(
        store,
        &item.output_location(ARTIFACT_ROOT, artifacts::BATCH_CATALOGS_FILE),
        &file_names,
    )
    .await
    .unwrap();
    catalogs
}

/// Location of the STAC item written for `granule_id` by `write_catalog`
pub fn item_location(item: &WorkItem, granule_id: &str) -> String {
    item.output_location(ARTIFACT_ROOT, &format!("{granule_id}.json"))
}

pub fn granules(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|n| format!("{prefix}-{n}")).collect()
}
