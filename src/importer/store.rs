//! Document store access
//!
//! The importer talks to a [`DocumentStore`]; production uses the
//! Elasticsearch REST API over `reqwest`.

use crate::catalog::Document;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Store rejected request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn index_exists(&self, index: &str) -> Result<bool, StoreError>;

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), StoreError>;

    async fn delete_index(&self, index: &str) -> Result<(), StoreError>;

    /// Store one document and return the id the store assigned
    async fn write_document(&self, index: &str, document: &Document) -> Result<String, StoreError>;

    async fn refresh(&self, index: &str) -> Result<(), StoreError>;

    async fn count(&self, index: &str) -> Result<u64, StoreError>;
}

// ============================================================================
// Elasticsearch
// ============================================================================

pub struct ElasticsearchStore {
    client: Client,
    base: Url,
}

impl ElasticsearchStore {
    pub fn new(base: Url) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self::with_client(client, base))
    }

    pub fn with_client(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    fn endpoint(&self, index: &str, action: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::Rejected(format!("{} cannot be a base URL", self.base)))?;
            segments.pop_if_empty().push(index);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn index_exists(&self, index: &str) -> Result<bool, StoreError> {
        let response = self.client.head(self.endpoint(index, None)?).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StoreError::Status {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), StoreError> {
        let response = self.client.put(self.endpoint(index, None)?).json(body).send().await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), StoreError> {
        let response = self.client.delete(self.endpoint(index, None)?).send().await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn write_document(&self, index: &str, document: &Document) -> Result<String, StoreError> {
        let response = self
            .client
            .post(self.endpoint(index, Some("_doc"))?)
            .json(document)
            .send()
            .await?;
        let body: Value = Self::expect_success(response).await?.json().await?;

        let id = body
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Rejected(format!("no _id in response: {}", body)))?;
        debug!("Indexed document {} into {}", id, index);
        Ok(id.to_string())
    }

    async fn refresh(&self, index: &str) -> Result<(), StoreError> {
        let response = self.client.post(self.endpoint(index, Some("_refresh"))?).send().await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn count(&self, index: &str) -> Result<u64, StoreError> {
        let response = self.client.get(self.endpoint(index, Some("_count"))?).send().await?;
        let body: Value = Self::expect_success(response).await?.json().await?;
        body.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::Rejected(format!("no count in response: {}", body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, State},
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Indices = Arc<Mutex<HashMap<String, Vec<Value>>>>;

    async fn head_index(State(indices): State<Indices>, Path(index): Path<String>) -> AxumStatus {
        if indices.lock().unwrap().contains_key(&index) {
            AxumStatus::OK
        } else {
            AxumStatus::NOT_FOUND
        }
    }

    async fn put_index(State(indices): State<Indices>, Path(index): Path<String>) -> (AxumStatus, Json<Value>) {
        let mut indices = indices.lock().unwrap();
        if indices.contains_key(&index) {
            return (AxumStatus::BAD_REQUEST, Json(json!({ "error": "resource_already_exists_exception" })));
        }
        indices.insert(index, Vec::new());
        (AxumStatus::OK, Json(json!({ "acknowledged": true })))
    }

    async fn delete_index(State(indices): State<Indices>, Path(index): Path<String>) -> AxumStatus {
        match indices.lock().unwrap().remove(&index) {
            Some(_) => AxumStatus::OK,
            None => AxumStatus::NOT_FOUND,
        }
    }

    async fn post_doc(
        State(indices): State<Indices>,
        Path(index): Path<String>,
        Json(doc): Json<Value>,
    ) -> (AxumStatus, Json<Value>) {
        let mut indices = indices.lock().unwrap();
        let docs = indices.entry(index).or_default();
        docs.push(doc);
        let id = format!("doc-{}", docs.len());
        (AxumStatus::CREATED, Json(json!({ "_id": id, "result": "created" })))
    }

    async fn refresh(Path(_index): Path<String>) -> Json<Value> {
        Json(json!({ "_shards": { "failed": 0 } }))
    }

    async fn count(State(indices): State<Indices>, Path(index): Path<String>) -> Json<Value> {
        let count = indices.lock().unwrap().get(&index).map_or(0, Vec::len);
        Json(json!({ "count": count }))
    }

    async fn spawn_fake_store() -> (Url, Indices) {
        let indices: Indices = Arc::default();
        let app = Router::new()
            .route("/{index}", get(head_index).put(put_index).delete(delete_index))
            .route("/{index}/_doc", post(post_doc))
            .route("/{index}/_refresh", post(refresh))
            .route("/{index}/_count", get(count))
            .with_state(indices.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (Url::parse(&format!("http://{}", addr)).unwrap(), indices)
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let store = ElasticsearchStore::with_client(Client::new(), Url::parse("http://es:9200/proxy").unwrap());

        assert_eq!(
            store.endpoint("cohort_centric", Some("_doc")).unwrap().as_str(),
            "http://es:9200/proxy/cohort_centric/_doc"
        );
        assert_eq!(
            store.endpoint("cohorts", None).unwrap().as_str(),
            "http://es:9200/proxy/cohorts"
        );
    }

    #[test]
    fn test_endpoint_rejects_opaque_base() {
        let store = ElasticsearchStore::with_client(Client::new(), Url::parse("mailto:ops@example.org").unwrap());

        assert!(matches!(store.endpoint("cohorts", None), Err(StoreError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_index_lifecycle_against_fake_store() {
        let (base, indices) = spawn_fake_store().await;
        let store = ElasticsearchStore::new(base).unwrap();

        assert!(!store.index_exists("cohorts").await.unwrap());
        store.create_index("cohorts", &json!({})).await.unwrap();
        assert!(store.index_exists("cohorts").await.unwrap());

        let mut doc = Document::new();
        doc.insert("cohort_name".to_string(), json!("CanPath"));
        let id = store.write_document("cohorts", &doc).await.unwrap();
        assert_eq!(id, "doc-1");

        store.refresh("cohorts").await.unwrap();
        assert_eq!(store.count("cohorts").await.unwrap(), 1);
        assert_eq!(indices.lock().unwrap()["cohorts"][0]["cohort_name"], "CanPath");

        store.delete_index("cohorts").await.unwrap();
        assert!(!store.index_exists("cohorts").await.unwrap());
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let (base, _) = spawn_fake_store().await;
        let store = ElasticsearchStore::new(base).unwrap();

        store.create_index("cohorts", &json!({})).await.unwrap();
        let err = store.create_index("cohorts", &json!({})).await.unwrap_err();

        match err {
            StoreError::Status { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("resource_already_exists_exception"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
