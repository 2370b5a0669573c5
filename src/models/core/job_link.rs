use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{StacAsset, StacItem};
use crate::constants::rels;

/// Temporal extent of a linked output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemporalRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// An output link recorded against a job when a chain finishes successfully
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLink {
    pub id: i64,
    pub job_id: Uuid,
    pub href: String,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub title: Option<String>,
    pub rel: String,
    pub temporal: Option<TemporalRange>,
    pub bbox: Option<Vec<f64>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJobLink {
    pub job_id: Uuid,
    pub href: String,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub title: Option<String>,
    pub rel: String,
    pub temporal: Option<TemporalRange>,
    pub bbox: Option<Vec<f64>>,
}

impl NewJobLink {
    /// Data link for one asset of a catalog item
    pub fn from_asset(job_id: Uuid, item: &StacItem, asset: &StacAsset) -> Self {
        Self {
            job_id,
            href: asset.href.clone(),
            media_type: asset.media_type.clone(),
            title: asset.title.clone(),
            rel: rels::DATA.to_string(),
            temporal: item.temporal_range(),
            bbox: item.bbox.clone(),
        }
    }

    pub fn into_job_link(self, id: i64, now: DateTime<Utc>) -> JobLink {
        JobLink {
            id,
            job_id: self.job_id,
            href: self.href,
            media_type: self.media_type,
            title: self.title,
            rel: self.rel,
            temporal: self.temporal,
            bbox: self.bbox,
            created_at: now,
        }
    }

    pub fn is_data(&self) -> bool {
        self.rel == rels::DATA
    }
}
