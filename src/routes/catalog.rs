//! Catalog API Routes
//!
//! Read-only views over the collected cohort catalog.

use crate::catalog::schema::index_mapping;
use crate::catalog::MetadataRecord;
use crate::error::{not_found_error, ApiResult, AppError};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==================== Request/Response Types ====================

#[derive(Debug, Deserialize)]
pub struct CohortQuery {
    /// Case-insensitive country filter
    pub country: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortListResponse {
    pub success: bool,
    pub count: usize,
    pub cohorts: Vec<MetadataRecord>,
}

#[derive(Debug, Serialize)]
pub struct CohortResponse {
    pub success: bool,
    pub cohort: MetadataRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
    pub success: bool,
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
    pub version: &'static str,
    pub cohorts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_loaded_at: Option<DateTime<Utc>>,
}

// ==================== Handlers ====================

pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let catalog = state.catalog().await;
    Json(HealthResponse {
        success: true,
        message: "Server is running fine.".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        cohorts: catalog.cohorts.len(),
        catalog_loaded_at: catalog.loaded_at,
    })
}

/// GET /api/cohorts
pub async fn list_cohorts(
    State(state): State<SharedState>,
    Query(query): Query<CohortQuery>,
) -> Json<CohortListResponse> {
    let catalog = state.catalog().await;
    let country = query.country.as_deref().map(str::trim).filter(|c| !c.is_empty());

    let cohorts: Vec<MetadataRecord> = catalog
        .cohorts
        .iter()
        .filter(|cohort| match country {
            Some(country) => cohort.countries.iter().any(|c| c.eq_ignore_ascii_case(country)),
            None => true,
        })
        .cloned()
        .collect();

    Json(CohortListResponse {
        success: true,
        count: cohorts.len(),
        cohorts,
    })
}

/// GET /api/cohorts/{name}
pub async fn get_cohort(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> ApiResult<Json<CohortResponse>> {
    let catalog = state.catalog().await;
    let cohort = catalog
        .cohorts
        .iter()
        .find(|cohort| cohort.cohort_name.eq_ignore_ascii_case(name.trim()))
        .cloned()
        .ok_or_else(|| not_found_error(format!("Cohort '{}' not found", name)))?;

    Ok(Json(CohortResponse {
        success: true,
        cohort,
    }))
}

/// GET /api/schema/mapping
pub async fn schema_mapping() -> Json<Value> {
    Json(index_mapping())
}

/// POST /api/catalog/reload
pub async fn reload_catalog(State(state): State<SharedState>) -> ApiResult<Json<ReloadResponse>> {
    let count = state.reload().await.map_err(AppError::from)?;

    Ok(Json(ReloadResponse {
        success: true,
        message: format!("Reloaded catalog from {}", state.catalog_path().display()),
        count,
    }))
}
