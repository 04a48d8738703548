//! Metadata Extractor
//!
//! Runs at each site. Reads the local patient table and reduces it to a
//! single cohort metadata record. Only range labels and counts leave the
//! site, never rows.

use crate::catalog::bucket::ratio_label;
use crate::catalog::record::{MetadataRecord, TriState};
use crate::catalog::schema::{AVAILABLE_DATA_TYPES, COHORT_ANCESTRY, SCHEMA, TYPE_OF_COHORT};
use crate::catalog::RangeLabel;
use crate::discovery::sites::SiteDirectory;
use crate::discovery::task::SiteTask;
use crate::discovery::types::ParticipantId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const EXTRACT_TASK_NAME: &str = "extract_cohort_metadata";

const ETHNICITY_FIELD: &str = "ethnicity";
const GENOMIC_FLAG_FIELD: &str = "has_genomic_data";
const BIOSAMPLE_FIELD: &str = "biosample_type";
const FLAG_SENTINEL: &str = "Yes";

/// One row of a site's local table
pub type DatasetRow = HashMap<String, String>;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Data file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Dataset for {0} has no rows")]
    EmptyDataset(ParticipantId),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Per-site access to the local table
pub trait DatasetReader: Send + Sync {
    fn read_rows(&self, participant: &ParticipantId) -> Result<Vec<DatasetRow>, ExtractError>;
}

/// Reads `<root>/<participant>/<filename>` as a headed CSV
#[derive(Debug, Clone)]
pub struct CsvDatasetReader {
    root: PathBuf,
    filename: String,
}

impl CsvDatasetReader {
    pub fn new(root: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            filename: filename.into(),
        }
    }

    pub fn path_for(&self, participant: &ParticipantId) -> PathBuf {
        self.root.join(participant.as_str()).join(&self.filename)
    }
}

impl DatasetReader for CsvDatasetReader {
    fn read_rows(&self, participant: &ParticipantId) -> Result<Vec<DatasetRow>, ExtractError> {
        let path = self.path_for(participant);
        if !path.exists() {
            return Err(ExtractError::SourceNotFound(path));
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let rows = reader
            .deserialize::<DatasetRow>()
            .collect::<Result<Vec<_>, _>>()?;

        info!("Loaded {} patient records from {}", rows.len(), path.display());
        Ok(rows)
    }
}

/// Site task producing one [`MetadataRecord`]
pub struct MetadataExtractor {
    directory: SiteDirectory,
    reader: Arc<dyn DatasetReader>,
}

impl MetadataExtractor {
    pub fn new(directory: SiteDirectory, reader: Arc<dyn DatasetReader>) -> Self {
        Self { directory, reader }
    }

    pub fn extract(&self, participant: &ParticipantId) -> Result<MetadataRecord, ExtractError> {
        info!("Extracting cohort metadata for {}", participant);

        let rows = self.reader.read_rows(participant)?;
        let total = NonZeroUsize::new(rows.len())
            .ok_or_else(|| ExtractError::EmptyDataset(participant.clone()))?;

        Ok(self.build_record(participant, &rows, total))
    }

    fn build_record(
        &self,
        participant: &ParticipantId,
        rows: &[DatasetRow],
        total: NonZeroUsize,
    ) -> MetadataRecord {
        let identity = self.directory.resolve(participant);
        let genomic = ratio_label(count_flagged(rows, GENOMIC_FLAG_FIELD), total);

        let mut record = MetadataRecord::new(identity.name);
        record.pi_lead = Some("Dr. Site Lead".to_string());
        record.website = Some(format!("https://{}.example.org", participant));
        record.countries = vec![identity.country];
        record.current_enrollment = Some(total.get() as u64);
        record.target_enrollment = Some(total.get() as u64 * 2);
        record.dictionary_harmonized = TriState::Yes;
        record.irb_approved_data_sharing = Some(RangeLabel::Most);
        record.enrollment_period = Some("2010:-".to_string());

        record.type_of_cohort = group_keys(TYPE_OF_COHORT)
            .map(|key| {
                let value = matches!(key, "longitudinal" | "health_records");
                (key.to_string(), TriState::from(value))
            })
            .collect();

        record.cohort_ancestry = ancestry_labels(rows, total);

        record.available_data_types = group_keys(AVAILABLE_DATA_TYPES)
            .map(|key| {
                let label = match key {
                    "genomic_data" | "genomic_data_array" => genomic,
                    "genomic_data_wgs" | "genomic_data_wes" | "genomic_data_other"
                    | "imaging_data" => RangeLabel::UpToQuarter,
                    _ => RangeLabel::Most,
                };
                (key.to_string(), label)
            })
            .collect();

        record.questionnaire_survey_data = BTreeMap::from([
            (
                "diseases".to_string(),
                strings(&["Cardiovascular diseases", "Endocrine system diseases", "Cancer"]),
            ),
            (
                "lifestyle_and_behaviours".to_string(),
                strings(&[
                    "Alcohol use history",
                    "Dietary history",
                    "Physical activity history",
                    "Sleep history",
                    "Tobacco use history",
                ]),
            ),
            (
                "survey_administration".to_string(),
                strings(&["Date and time-related information", "Unique identifiers"]),
            ),
        ]);

        let sample_types = biosample_types(rows);
        if !sample_types.is_empty() {
            record.biosample.insert("sample_types".to_string(), sample_types);
        }

        debug!(
            "Built record '{}' for {} from {} rows",
            record.cohort_name,
            participant,
            total
        );
        record
    }
}

impl SiteTask for MetadataExtractor {
    type Output = MetadataRecord;

    fn name(&self) -> &'static str {
        EXTRACT_TASK_NAME
    }

    fn run(&self, participant: &ParticipantId) -> Result<MetadataRecord, ExtractError> {
        self.extract(participant)
    }
}

fn group_keys(group: &'static str) -> impl Iterator<Item = &'static str> {
    SCHEMA
        .groups
        .iter()
        .filter(move |g| g.name == group)
        .flat_map(|g| g.keys.iter().copied())
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn count_flagged(rows: &[DatasetRow], field: &str) -> usize {
    rows.iter()
        .filter(|row| row.get(field).map(String::as_str) == Some(FLAG_SENTINEL))
        .count()
}

/// Ancestry bucket key for a raw ethnicity value
fn ancestry_key(ethnicity: &str) -> &'static str {
    match ethnicity.trim().to_ascii_lowercase().as_str() {
        "asian" => "asian",
        "black" | "african" | "african american" | "black or african american" => {
            "black_african_american_or_african"
        }
        "white" | "european" | "caucasian" => "european_or_white",
        "hispanic" | "latino" | "latina" | "spanish" => "hispanic_latino_or_spanish",
        "middle eastern" | "north african" | "mena" => "middle_eastern_or_north_african",
        _ => "other",
    }
}

/// Each bucket is its own count over the full total
fn ancestry_labels(rows: &[DatasetRow], total: NonZeroUsize) -> BTreeMap<String, RangeLabel> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for row in rows {
        let key = ancestry_key(row.get(ETHNICITY_FIELD).map(String::as_str).unwrap_or(""));
        *counts.entry(key).or_default() += 1;
    }

    group_keys(COHORT_ANCESTRY)
        .map(|key| {
            let count = counts.get(key).copied().unwrap_or(0);
            (key.to_string(), ratio_label(count, total))
        })
        .collect()
}

/// Sorted union of the `|`-separated biosample column
fn biosample_types(rows: &[DatasetRow]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get(BIOSAMPLE_FIELD))
        .flat_map(|value| value.split('|'))
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Fixed rows keyed by participant
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatasetReader {
    datasets: HashMap<ParticipantId, Vec<DatasetRow>>,
}

#[cfg(test)]
impl InMemoryDatasetReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, participant: impl Into<ParticipantId>, rows: Vec<DatasetRow>) -> Self {
        self.datasets.insert(participant.into(), rows);
        self
    }
}

#[cfg(test)]
impl DatasetReader for InMemoryDatasetReader {
    fn read_rows(&self, participant: &ParticipantId) -> Result<Vec<DatasetRow>, ExtractError> {
        self.datasets
            .get(participant)
            .cloned()
            .ok_or_else(|| ExtractError::SourceNotFound(PathBuf::from(participant.as_str())))
    }
}
