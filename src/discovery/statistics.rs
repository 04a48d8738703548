//! Site statistics task
//!
//! Computes per-site sufficient statistics (count and sum per numeric
//! feature) for an external statistics service. Nothing here combines sites.

use crate::discovery::extractor::{DatasetReader, DatasetRow, ExtractError};
use crate::discovery::task::SiteTask;
use crate::discovery::types::{ParticipantId, SitePayload};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

pub const STATISTICS_TASK_NAME: &str = "compute_site_statistics";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub count: usize,
    pub sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteStatistics {
    pub participant: ParticipantId,
    pub row_count: usize,
    pub features: BTreeMap<String, FeatureSummary>,
}

impl SitePayload for SiteStatistics {
    fn describe(&self) -> String {
        format!("{} rows, {} numeric features", self.row_count, self.features.len())
    }
}

pub struct StatisticsSummarizer {
    reader: Arc<dyn DatasetReader>,
}

impl StatisticsSummarizer {
    pub fn new(reader: Arc<dyn DatasetReader>) -> Self {
        Self { reader }
    }

    pub fn summarize(&self, participant: &ParticipantId) -> Result<SiteStatistics, ExtractError> {
        let rows = self.reader.read_rows(participant)?;
        if rows.is_empty() {
            return Err(ExtractError::EmptyDataset(participant.clone()));
        }

        let columns: BTreeSet<&String> = rows.iter().flat_map(|row| row.keys()).collect();
        let features: BTreeMap<String, FeatureSummary> = columns
            .into_iter()
            .filter_map(|column| summarize_column(&rows, column).map(|s| (column.clone(), s)))
            .collect();

        info!(
            "Summarized {} rows and {} numeric features for {}",
            rows.len(),
            features.len(),
            participant
        );

        Ok(SiteStatistics {
            participant: participant.clone(),
            row_count: rows.len(),
            features,
        })
    }
}

impl SiteTask for StatisticsSummarizer {
    type Output = SiteStatistics;

    fn name(&self) -> &'static str {
        STATISTICS_TASK_NAME
    }

    fn run(&self, participant: &ParticipantId) -> Result<SiteStatistics, ExtractError> {
        self.summarize(participant)
    }
}

/// Yes/No count as 1/0
fn numeric_value(raw: &str) -> Option<f64> {
    match raw.trim() {
        "Yes" => Some(1.0),
        "No" => Some(0.0),
        other => other.parse::<f64>().ok().filter(|f| f.is_finite()),
    }
}

/// `None` when any non-empty cell is not numeric (categorical column)
fn summarize_column(rows: &[DatasetRow], column: &str) -> Option<FeatureSummary> {
    let mut summary = FeatureSummary { count: 0, sum: 0.0 };

    for cell in rows.iter().filter_map(|row| row.get(column)) {
        if cell.trim().is_empty() {
            continue;
        }
        let value = numeric_value(cell)?;
        summary.count += 1;
        summary.sum += value;
    }

    (summary.count > 0).then_some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::extractor::InMemoryDatasetReader;

    fn row(pairs: &[(&str, &str)]) -> DatasetRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_summarize_numeric_and_flag_columns() {
        let reader = InMemoryDatasetReader::new().with_rows(
            "site-1",
            vec![
                row(&[("age", "40"), ("has_diabetes", "Yes"), ("sex", "F")]),
                row(&[("age", "60"), ("has_diabetes", "No"), ("sex", "M")]),
                row(&[("age", ""), ("has_diabetes", "Yes"), ("sex", "F")]),
            ],
        );
        let stats = StatisticsSummarizer::new(Arc::new(reader))
            .summarize(&"site-1".into())
            .unwrap();

        assert_eq!(stats.row_count, 3);
        assert_eq!(stats.features["age"], FeatureSummary { count: 2, sum: 100.0 });
        assert_eq!(stats.features["has_diabetes"], FeatureSummary { count: 3, sum: 2.0 });
        assert!(!stats.features.contains_key("sex"));
    }

    #[test]
    fn test_empty_dataset() {
        let reader = InMemoryDatasetReader::new().with_rows("site-1", Vec::new());
        let result = StatisticsSummarizer::new(Arc::new(reader)).summarize(&"site-1".into());

        assert!(matches!(result, Err(ExtractError::EmptyDataset(_))));
    }
}
