//! Cohort Catalog Model
//!
//! Everything about the shape of a cohort record:
//! - Disclosure-safe range labels (bucketing)
//! - The metadata record and its nested document form
//! - The schema that names every flat column
//! - Flatten / unflatten between the nested and tabular forms
//! - JSON and CSV exports

pub mod bucket;
pub mod export;
pub mod mapper;
pub mod record;
pub mod schema;

pub use bucket::RangeLabel;
pub use export::{CatalogWriter, ExportError};
pub use mapper::{unflatten, FlatRow};
pub use record::{Document, MetadataRecord};
