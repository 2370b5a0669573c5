//! STAC documents exchanged with workers: catalogs that link to items, and items
//! that carry data assets with spatial and temporal extents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::constants::{artifacts, rels};
use crate::models::TemporalRange;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacLink {
    pub href: String,
    pub rel: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl StacLink {
    pub fn is_item(&self) -> bool {
        self.rel == rels::ITEM
    }

    fn page(rel: &str, href: String, title: &str) -> Self {
        Self {
            href,
            rel: rel.to_string(),
            media_type: Some(artifacts::JSON_MEDIA_TYPE.to_string()),
            title: Some(title.to_string()),
        }
    }

    pub fn prev_page(href: String) -> Self {
        Self::page(rels::PREV, href, "Previous page")
    }

    pub fn next_page(href: String) -> Self {
        Self::page(rels::NEXT, href, "Next page")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacCatalog {
    pub stac_version: String,
    #[serde(default)]
    pub stac_extensions: Vec<String>,
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacCatalog {
    /// One page of an aggregated catalog chain
    pub fn aggregation_page(links: Vec<StacLink>) -> Self {
        Self {
            stac_version: artifacts::STAC_VERSION.to_string(),
            stac_extensions: Vec::new(),
            id: Uuid::new_v4().to_string(),
            description: "Aggregation input catalogs".to_string(),
            links,
        }
    }

    pub fn item_links(&self) -> impl Iterator<Item = &StacLink> {
        self.links.iter().filter(|link| link.is_item())
    }

    pub fn link(&self, rel: &str) -> Option<&StacLink> {
        self.links.iter().find(|link| link.rel == rel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacAsset {
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StacItemProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub properties: StacItemProperties,
    /// Assets keyed by role name, "data" being the primary output
    #[serde(default)]
    pub assets: BTreeMap<String, StacAsset>,
    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacItem {
    /// Start/end extent; a single `datetime` counts as a zero-length range
    pub fn temporal_range(&self) -> Option<TemporalRange> {
        let props = &self.properties;
        match (props.start_datetime, props.end_datetime, props.datetime) {
            (Some(start), Some(end), _) => Some(TemporalRange { start, end }),
            (_, _, Some(instant)) => Some(TemporalRange {
                start: instant,
                end: instant,
            }),
            _ => None,
        }
    }

    pub fn data_asset(&self) -> Option<&StacAsset> {
        self.assets.get(rels::DATA)
    }
}
