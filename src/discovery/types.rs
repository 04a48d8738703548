//! Types shared by the site tasks, the dispatch transport and the coordinator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one data-holding site, e.g. `site-3`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What a site sent back for one task
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome<T> {
    Success(T),
    Failed(String),
}

/// A single response travelling from a site to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub participant: ParticipantId,
    /// Task name the site answered, used to drop stray results
    pub task: String,
    pub outcome: ResponseOutcome<T>,
}

impl<T> Envelope<T> {
    pub fn success(participant: impl Into<ParticipantId>, task: impl Into<String>, payload: T) -> Self {
        Self {
            participant: participant.into(),
            task: task.into(),
            outcome: ResponseOutcome::Success(payload),
        }
    }

    pub fn failure(
        participant: impl Into<ParticipantId>,
        task: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            participant: participant.into(),
            task: task.into(),
            outcome: ResponseOutcome::Failed(error.into()),
        }
    }
}

/// Payloads that can describe themselves in a log line
pub trait SitePayload: Send + 'static {
    fn describe(&self) -> String;
}

impl SitePayload for crate::catalog::MetadataRecord {
    fn describe(&self) -> String {
        self.cohort_name.clone()
    }
}
