//! Task dispatch
//!
//! The coordinator only sees a stream of [`Envelope`]s. How a request
//! reaches a site and how its answer comes back is the transport's business.

use crate::discovery::extractor::ExtractError;
use crate::discovery::task::SiteTask;
use crate::discovery::types::{Envelope, ParticipantId, SitePayload};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TaskDispatch: Send + Sync {
    type Payload: SitePayload;

    /// Send `task_name` to every target and return the response stream.
    /// The stream ends once every sender is done; responses may arrive in
    /// any order, more than once, or never.
    async fn broadcast(
        &self,
        task_name: &str,
        targets: &BTreeSet<ParticipantId>,
    ) -> Result<mpsc::Receiver<Envelope<Self::Payload>>, DispatchError>;
}

/// Runs a [`SiteTask`] for every target inside this process, one blocking
/// worker per site.
pub struct LocalDispatch<S: SiteTask> {
    task: Arc<S>,
}

impl<S: SiteTask> LocalDispatch<S> {
    pub fn new(task: S) -> Self {
        Self { task: Arc::new(task) }
    }

    pub fn task_name(&self) -> &'static str {
        self.task.name()
    }
}

#[async_trait]
impl<S: SiteTask> TaskDispatch for LocalDispatch<S> {
    type Payload = S::Output;

    async fn broadcast(
        &self,
        task_name: &str,
        targets: &BTreeSet<ParticipantId>,
    ) -> Result<mpsc::Receiver<Envelope<S::Output>>, DispatchError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DispatchError::Unavailable(e.to_string()))?;
        let (tx, rx) = mpsc::channel(targets.len().max(1));

        for participant in targets {
            let tx = tx.clone();
            let task = Arc::clone(&self.task);
            let requested = task_name.to_string();
            let participant = participant.clone();

            runtime.spawn(async move {
                let envelope = run_on_site(task, requested, participant).await;
                if tx.send(envelope).await.is_err() {
                    debug!("Round already closed, dropping late response");
                }
            });
        }

        Ok(rx)
    }
}

async fn run_on_site<S: SiteTask>(
    task: Arc<S>,
    requested: String,
    participant: ParticipantId,
) -> Envelope<S::Output> {
    let name = task.name();
    if requested != name {
        warn!("Site {} does not handle task '{}'", participant, requested);
        let error = ExtractError::UnknownTask(requested.clone());
        return Envelope::failure(participant, requested, error.to_string());
    }

    let site = participant.clone();
    match tokio::task::spawn_blocking(move || task.run(&site)).await {
        Ok(Ok(payload)) => Envelope::success(participant, name, payload),
        Ok(Err(e)) => Envelope::failure(participant, name, e.to_string()),
        Err(e) => Envelope::failure(participant, name, format!("Site task aborted: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::extractor::{InMemoryDatasetReader, MetadataExtractor, EXTRACT_TASK_NAME};
    use crate::discovery::sites::SiteDirectory;
    use crate::discovery::types::ResponseOutcome;
    use std::collections::HashMap;

    fn extractor() -> MetadataExtractor {
        let rows = vec![HashMap::from([
            ("ethnicity".to_string(), "Asian".to_string()),
            ("has_genomic_data".to_string(), "Yes".to_string()),
            ("biosample_type".to_string(), "Blood".to_string()),
        ])];
        let reader = InMemoryDatasetReader::new().with_rows("site-1", rows);
        MetadataExtractor::new(SiteDirectory::builtin(), Arc::new(reader))
    }

    fn targets(ids: &[&str]) -> BTreeSet<ParticipantId> {
        ids.iter().map(|id| ParticipantId::from(*id)).collect()
    }

    #[tokio::test]
    async fn test_local_dispatch_reports_success_and_failure() {
        let dispatch = LocalDispatch::new(extractor());
        let mut rx = dispatch
            .broadcast(EXTRACT_TASK_NAME, &targets(&["site-1", "site-2"]))
            .await
            .unwrap();

        let mut outcomes = HashMap::new();
        while let Some(envelope) = rx.recv().await {
            assert_eq!(envelope.task, EXTRACT_TASK_NAME);
            outcomes.insert(envelope.participant.to_string(), envelope.outcome);
        }

        assert_eq!(outcomes.len(), 2);
        match &outcomes["site-1"] {
            ResponseOutcome::Success(record) => assert_eq!(record.cohort_name, "Nordic Biobank"),
            other => panic!("expected success, got {:?}", other),
        }
        assert!(matches!(outcomes["site-2"], ResponseOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_local_dispatch_rejects_foreign_task() {
        let dispatch = LocalDispatch::new(extractor());
        let mut rx = dispatch
            .broadcast("train_model", &targets(&["site-1"]))
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.task, "train_model");
        match envelope.outcome {
            ResponseOutcome::Failed(message) => assert!(message.contains("train_model")),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
