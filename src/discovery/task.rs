//! Site task capability
//!
//! A site task is what a participant runs when the coordinator broadcasts a
//! request. Which task a round uses is chosen by configuration.

use crate::discovery::extractor::ExtractError;
use crate::discovery::types::{ParticipantId, SitePayload};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub trait SiteTask: Send + Sync + 'static {
    type Output: SitePayload + Serialize;

    /// Task name carried on every request and response
    fn name(&self) -> &'static str;

    /// Produce this participant's payload. Blocking I/O is allowed.
    fn run(&self, participant: &ParticipantId) -> Result<Self::Output, ExtractError>;
}

/// Configured task selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// One cohort metadata record per site
    #[default]
    Metadata,
    /// Local sufficient statistics per site
    Statistics,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Metadata => f.write_str("metadata"),
            TaskKind::Statistics => f.write_str("statistics"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metadata" => Ok(TaskKind::Metadata),
            "statistics" | "stats" => Ok(TaskKind::Statistics),
            other => Err(format!("Unknown site task '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_parsing() {
        assert_eq!("metadata".parse::<TaskKind>().unwrap(), TaskKind::Metadata);
        assert_eq!(" Stats ".parse::<TaskKind>().unwrap(), TaskKind::Statistics);
        assert!("histogram".parse::<TaskKind>().is_err());
        assert_eq!(TaskKind::default().to_string(), "metadata");
    }
}
