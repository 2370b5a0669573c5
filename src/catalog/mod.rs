//! # Catalogs and Object Storage
//!
//! Workers exchange STAC catalogs through an object store. The orchestrator reads
//! them to aggregate step outputs, to record job links and to find a failed item's
//! input URL, and writes the paged catalogs that feed aggregating steps.

pub mod object_store;
pub mod reader;
pub mod stac;

pub use object_store::{read_json, write_json, FileSystemObjectStore, InMemoryObjectStore, ObjectStore};
pub use reader::{read_catalog_items, read_item_links, resolve_href};
pub use stac::{StacAsset, StacCatalog, StacItem, StacItemProperties, StacLink};
