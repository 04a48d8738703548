//! Cohort metadata record
//!
//! The unit exchanged between sites and the catalog. One record per
//! participant per round, immutable once produced.

use crate::catalog::bucket::RangeLabel;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Nested document form of a record (or of an imported row)
pub type Document = Map<String, Value>;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Record has no cohort_name")]
    MissingCohortName,

    #[error("Malformed record document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Yes / No / unknown. Unknown is carried as absence in every serialized form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum TriState {
    Yes,
    No,
    #[default]
    Unknown,
}

impl TriState {
    pub fn is_unknown(&self) -> bool {
        matches!(self, TriState::Unknown)
    }

    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            TriState::Yes => Some("Yes"),
            TriState::No => Some("No"),
            TriState::Unknown => None,
        }
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value {
            TriState::Yes
        } else {
            TriState::No
        }
    }
}

impl From<Option<bool>> for TriState {
    fn from(value: Option<bool>) -> Self {
        value.map(TriState::from).unwrap_or_default()
    }
}

impl From<Option<String>> for TriState {
    fn from(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("Yes") => TriState::Yes,
            Some("No") => TriState::No,
            _ => TriState::Unknown,
        }
    }
}

impl From<TriState> for Option<String> {
    fn from(value: TriState) -> Self {
        value.as_str().map(str::to_string)
    }
}

/// Metadata describing one cohort held by one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub cohort_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pi_lead: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub countries: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_enrollment: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_enrollment: Option<u64>,

    #[serde(default, skip_serializing_if = "TriState::is_unknown")]
    pub dictionary_harmonized: TriState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irb_approved_data_sharing: Option<RangeLabel>,

    /// Free-text interval, e.g. `2010:-`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrollment_period: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub available_data_types: BTreeMap<String, RangeLabel>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cohort_ancestry: BTreeMap<String, RangeLabel>,

    #[serde(
        default,
        skip_serializing_if = "all_unknown",
        serialize_with = "serialize_known"
    )]
    pub type_of_cohort: BTreeMap<String, TriState>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub questionnaire_survey_data: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub laboratory_measures: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub biosample: BTreeMap<String, Vec<String>>,
}

fn all_unknown(map: &BTreeMap<String, TriState>) -> bool {
    map.values().all(TriState::is_unknown)
}

/// Unknown group entries are omitted rather than written as `null`
fn serialize_known<S: Serializer>(map: &BTreeMap<String, TriState>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(map.iter().filter(|(_, state)| !state.is_unknown()))
}

impl MetadataRecord {
    pub fn new(cohort_name: impl Into<String>) -> Self {
        Self {
            cohort_name: cohort_name.into(),
            pi_lead: None,
            website: None,
            countries: Vec::new(),
            current_enrollment: None,
            target_enrollment: None,
            dictionary_harmonized: TriState::Unknown,
            irb_approved_data_sharing: None,
            enrollment_period: None,
            available_data_types: BTreeMap::new(),
            cohort_ancestry: BTreeMap::new(),
            type_of_cohort: BTreeMap::new(),
            questionnaire_survey_data: BTreeMap::new(),
            laboratory_measures: BTreeMap::new(),
            biosample: BTreeMap::new(),
        }
    }

    /// Nested document form. Cannot fail: every field is plain data.
    pub fn to_document(&self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Document::new(),
        }
    }

    pub fn from_document(document: Document) -> Result<Self, RecordError> {
        let record: MetadataRecord = serde_json::from_value(Value::Object(document))?;
        if record.cohort_name.trim().is_empty() {
            return Err(RecordError::MissingCohortName);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_record_document() {
        let record = MetadataRecord::new("Nordic Biobank");
        let doc = record.to_document();

        assert_eq!(Value::Object(doc), json!({ "cohort_name": "Nordic Biobank" }));
    }

    #[test]
    fn test_unknown_tristate_is_omitted() {
        let mut record = MetadataRecord::new("x");
        record.dictionary_harmonized = TriState::No;
        record.type_of_cohort.insert("longitudinal".into(), TriState::Yes);
        record.type_of_cohort.insert("other".into(), TriState::Unknown);

        let doc = Value::Object(record.to_document());
        assert_eq!(doc["dictionary_harmonized"], json!("No"));
        assert_eq!(doc["type_of_cohort"], json!({ "longitudinal": "Yes" }));
    }

    #[test]
    fn test_group_of_only_unknowns_is_omitted() {
        let mut record = MetadataRecord::new("x");
        record.type_of_cohort.insert("other".into(), TriState::Unknown);

        let doc = record.to_document();
        assert!(!doc.contains_key("type_of_cohort"));
        assert!(!serde_json::to_string(&record).unwrap().contains("null"));
    }

    #[test]
    fn test_from_document_rejects_blank_name() {
        let mut doc = Document::new();
        doc.insert("cohort_name".into(), json!("  "));
        assert!(matches!(
            MetadataRecord::from_document(doc),
            Err(RecordError::MissingCohortName)
        ));
    }

    #[test]
    fn test_from_document_roundtrip() {
        let mut record = MetadataRecord::new("CanPath");
        record.countries = vec!["Canada".into()];
        record.current_enrollment = Some(1000);
        record.irb_approved_data_sharing = Some(RangeLabel::Most);

        let back = MetadataRecord::from_document(record.to_document()).unwrap();
        assert_eq!(back, record);
    }
}
