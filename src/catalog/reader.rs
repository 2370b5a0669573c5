//! Catalog reading: resolve a catalog's item links and load the items they point at.
//! Relative hrefs are resolved against the document that contains them.

use std::path::Path;
use tracing::debug;
use url::Url;

use super::object_store::{read_json, ObjectStore};
use super::stac::{StacCatalog, StacItem, StacLink};
use crate::error::OrchestratorResult;

/// Resolve `href` relative to the document at `base`
pub fn resolve_href(base: &str, href: &str) -> String {
    if Url::parse(href).is_ok() || href.starts_with('/') {
        return href.to_string();
    }
    if let Ok(base_url) = Url::parse(base) {
        if let Ok(joined) = base_url.join(href) {
            return joined.to_string();
        }
    }
    let relative = href.trim_start_matches("./");
    match Path::new(base).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(relative).to_string_lossy().into_owned()
        }
        _ => relative.to_string(),
    }
}

/// Item links of the catalog at `catalog_location`, hrefs made absolute
pub async fn read_item_links(
    store: &dyn ObjectStore,
    catalog_location: &str,
) -> OrchestratorResult<Vec<StacLink>> {
    let catalog: StacCatalog = read_json(store, catalog_location).await?;
    Ok(catalog
        .item_links()
        .map(|link| StacLink {
            href: resolve_href(catalog_location, &link.href),
            ..link.clone()
        })
        .collect())
}

/// Every item of the catalog at `catalog_location`. Asset hrefs are made absolute.
/// Sub-catalogs are not followed.
pub async fn read_catalog_items(
    store: &dyn ObjectStore,
    catalog_location: &str,
) -> OrchestratorResult<Vec<StacItem>> {
    let links = read_item_links(store, catalog_location).await?;
    let mut items = Vec::with_capacity(links.len());
    for link in links {
        let mut item: StacItem = read_json(store, &link.href).await?;
        for asset in item.assets.values_mut() {
            asset.href = resolve_href(&link.href, &asset.href);
        }
        items.push(item);
    }
    debug!(
        catalog_location = %catalog_location,
        item_count = items.len(),
        "Read catalog items"
    );
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::object_store::InMemoryObjectStore;
    use serde_json::json;

    #[test]
    fn test_resolve_href() {
        assert_eq!(
            resolve_href("s3://bucket/job/1/outputs/catalog.json", "./item0.json"),
            "s3://bucket/job/1/outputs/item0.json"
        );
        assert_eq!(
            resolve_href("s3://bucket/job/1/outputs/catalog.json", "s3://other/item.json"),
            "s3://other/item.json"
        );
        assert_eq!(
            resolve_href("/tmp/job/1/outputs/catalog.json", "item0.json"),
            "/tmp/job/1/outputs/item0.json"
        );
        assert_eq!(
            resolve_href("/tmp/job/1/outputs/catalog.json", "/abs/item.json"),
            "/abs/item.json"
        );
    }

    #[tokio::test]
    async fn test_read_catalog_items_resolves_assets() {
        let store = InMemoryObjectStore::new();
        store
            .put_json(
                "s3://b/out/catalog.json",
                &json!({
                    "stac_version": "1.0.0",
                    "id": "c",
                    "links": [
                        {"href": "./item0.json", "rel": "item"},
                        {"href": "../root.json", "rel": "root"}
                    ]
                }),
            )
            .await
            .unwrap();
        store
            .put_json(
                "s3://b/out/item0.json",
                &json!({
                    "id": "i0",
                    "assets": {"data": {"href": "./granule.tif", "title": "granule"}}
                }),
            )
            .await
            .unwrap();

        let items = read_catalog_items(&store, "s3://b/out/catalog.json").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data_asset().unwrap().href, "s3://b/out/granule.tif");
    }
}
