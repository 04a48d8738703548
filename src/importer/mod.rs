//! Catalog Importer
//!
//! Rebuilds nested documents from flat rows and loads them into the
//! document store. Documents are written one at a time in input order; a
//! failed write is counted and logged, never fatal. Only failing to prepare
//! the index stops an import.

pub mod store;

use crate::catalog::schema::index_mapping;
use crate::catalog::{unflatten, FlatRow};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

pub use store::{DocumentStore, ElasticsearchStore, StoreError};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to prepare index: {0}")]
    Index(#[from] StoreError),
}

/// What to do when the target index already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexPolicy {
    #[default]
    Reuse,
    ForceRecreate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub success: usize,
    pub failed: usize,
    /// Rows without a usable `cohort_name`
    pub skipped: usize,
    /// Store document count after refresh, when the store answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_total: Option<u64>,
}

pub struct CatalogImporter<S> {
    store: S,
    index: String,
}

impl<S: DocumentStore> CatalogImporter<S> {
    pub fn new(store: S, index: impl Into<String>) -> Self {
        Self {
            store,
            index: index.into(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Create the index unless it exists; recreate it under `ForceRecreate`
    pub async fn ensure_index(&self, policy: IndexPolicy) -> Result<(), ImportError> {
        let exists = self.store.index_exists(&self.index).await?;

        if exists {
            match policy {
                IndexPolicy::Reuse => {
                    info!("Index '{}' already exists, reusing it", self.index);
                    return Ok(());
                }
                IndexPolicy::ForceRecreate => {
                    warn!("Deleting existing index '{}'", self.index);
                    self.store.delete_index(&self.index).await?;
                }
            }
        }

        self.store.create_index(&self.index, &index_mapping()).await?;
        info!("Created index '{}'", self.index);
        Ok(())
    }

    /// Write every row that carries a cohort name
    pub async fn import(&self, rows: &[FlatRow]) -> ImportReport {
        let mut report = ImportReport::default();

        for (row_index, row) in rows.iter().enumerate() {
            let document = unflatten(row);
            let Some(name) = cohort_name(&document) else {
                warn!("Skipping row {}: no cohort_name", row_index);
                report.skipped += 1;
                continue;
            };

            match self.store.write_document(&self.index, &document).await {
                Ok(_) => report.success += 1,
                Err(e) => {
                    error!(
                        "Failed to index row {} ('{}'): {}",
                        row_index, name, e
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Prepare the index, load the rows, then refresh and count
    pub async fn run(&self, rows: &[FlatRow], policy: IndexPolicy) -> Result<ImportReport, ImportError> {
        self.ensure_index(policy).await?;

        let mut report = self.import(rows).await;
        info!(
            "Import finished: {} indexed, {} failed, {} skipped",
            report.success, report.failed, report.skipped
        );

        if let Err(e) = self.store.refresh(&self.index).await {
            warn!("Refresh of '{}' failed: {}", self.index, e);
        }
        match self.store.count(&self.index).await {
            Ok(total) => {
                info!("Index '{}' now holds {} documents", self.index, total);
                report.indexed_total = Some(total);
            }
            Err(e) => warn!("Count of '{}' failed: {}", self.index, e),
        }

        Ok(report)
    }
}

fn cohort_name(document: &crate::catalog::Document) -> Option<&str> {
    document
        .get("cohort_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
}
