//! Application state management
//!
//! The API serves an in-memory copy of the nested catalog export. Reloading
//! swaps the whole list at once; readers never see a partial catalog.

use crate::catalog::export::read_catalog;
use crate::catalog::{ExportError, MetadataRecord};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub struct LoadedCatalog {
    pub cohorts: Vec<MetadataRecord>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Application state shared across all handlers
pub struct AppState {
    catalog_path: PathBuf,
    catalog: RwLock<LoadedCatalog>,
}

impl AppState {
    /// Empty state; call [`AppState::reload`] to read the export
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            catalog: RwLock::new(LoadedCatalog {
                cohorts: Vec::new(),
                loaded_at: None,
            }),
        }
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    /// Re-read the export from disk. On failure the previous catalog stays.
    pub async fn reload(&self) -> Result<usize, ExportError> {
        let path = self.catalog_path.clone();
        let cohorts = tokio::task::spawn_blocking(move || read_catalog(&path))
            .await
            .map_err(|e| ExportError::Io(std::io::Error::other(e)))??;

        let count = cohorts.len();
        let mut catalog = self.catalog.write().await;
        catalog.cohorts = cohorts;
        catalog.loaded_at = Some(Utc::now());
        info!("Loaded {} cohorts from {}", count, self.catalog_path.display());
        Ok(count)
    }

    pub async fn catalog(&self) -> tokio::sync::RwLockReadGuard<'_, LoadedCatalog> {
        self.catalog.read().await
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
