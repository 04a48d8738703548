//! Schema Mapper
//!
//! Converts between the nested document form of a cohort and a flat row
//! (column name -> scalar). Both directions are driven by [`COLUMNS`], so
//! the column naming contract lives in exactly one place.
//!
//! Unflattening is lenient on purpose: a cell that cannot be parsed is
//! treated as missing information and dropped, never reported as an error.

use crate::catalog::record::{Document, MetadataRecord, TriState};
use crate::catalog::schema::{ColumnSpec, FieldKind, FieldPath, COLUMNS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Separator used when a sequence is stored in a single cell
pub const LIST_SEPARATOR: char = '|';
/// Accepted on import, normalised to [`LIST_SEPARATOR`]
pub const LEGACY_LIST_SEPARATOR: char = ';';

/// A single flat cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlatValue {
    Integer(i64),
    Text(String),
}

impl FlatValue {
    fn is_blank(&self) -> bool {
        match self {
            FlatValue::Integer(_) => false,
            FlatValue::Text(s) => s.trim().is_empty(),
        }
    }
}

impl fmt::Display for FlatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlatValue::Integer(i) => write!(f, "{}", i),
            FlatValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FlatValue {
    fn from(value: &str) -> Self {
        FlatValue::Text(value.to_string())
    }
}

/// Column name -> cell. Absent fields are absent columns.
pub type FlatRow = BTreeMap<String, FlatValue>;

// =============================================================================
// FLATTEN
// =============================================================================

/// Flatten a record into one row using the canonical column names.
///
/// List items are joined with `|`. An item that itself contains `|` or `;`
/// comes back as several items after [`unflatten`].
pub fn flatten(record: &MetadataRecord) -> FlatRow {
    flatten_document(&record.to_document())
}

/// Flatten any nested document. Keys outside the schema are not exported.
pub fn flatten_document(document: &Document) -> FlatRow {
    let mut row = FlatRow::new();

    for column in COLUMNS.iter() {
        let Some(value) = lookup(document, &column.path) else {
            continue;
        };
        if let Some(cell) = to_cell(value) {
            row.insert(column.column.clone(), cell);
        }
    }

    row
}

fn lookup<'a>(document: &'a Document, path: &FieldPath) -> Option<&'a Value> {
    match path {
        FieldPath::Top(name) => document.get(*name),
        FieldPath::Group { group, key } => document.get(*group)?.as_object()?.get(*key),
    }
}

fn to_cell(value: &Value) -> Option<FlatValue> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(FlatValue::Text(s.clone())),
        Value::Bool(b) => TriState::from(*b).as_str().map(FlatValue::from),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => FlatValue::Integer(i),
            None => FlatValue::Text(n.to_string()),
        }),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) if s.trim().is_empty() => None,
                    Value::String(s) => {
                        if s.contains([LIST_SEPARATOR, LEGACY_LIST_SEPARATOR]) {
                            debug!("List item '{}' contains a separator and will split on import", s);
                        }
                        Some(s.clone())
                    }
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(FlatValue::Text(parts.join(&LIST_SEPARATOR.to_string())))
            }
        }
        Value::Object(_) => None,
    }
}

// =============================================================================
// UNFLATTEN
// =============================================================================

/// Rebuild a cleaned nested document from a flat row.
///
/// Legacy aliases are honoured; a blank cell under the canonical name falls
/// through to the next alias.
pub fn unflatten(row: &FlatRow) -> Document {
    let mut document = Document::new();

    for column in COLUMNS.iter() {
        let value = resolve(row, column)
            .and_then(|cell| parse_cell(cell, column.kind))
            .unwrap_or(Value::Null);

        match &column.path {
            FieldPath::Top(name) => {
                document.insert(name.to_string(), value);
            }
            FieldPath::Group { group, key } => {
                let entry = document
                    .entry(group.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(nested) = entry {
                    nested.insert(key.to_string(), value);
                }
            }
        }
    }

    clean_document(document)
}

/// First non-blank cell among the canonical column and its aliases
fn resolve<'a>(row: &'a FlatRow, column: &ColumnSpec) -> Option<&'a FlatValue> {
    column.candidates().find_map(|name| {
        let cell = row.get(name)?;
        if cell.is_blank() {
            None
        } else {
            if name != column.column {
                debug!("Column {} resolved through alias {}", column.column, name);
            }
            Some(cell)
        }
    })
}

fn parse_cell(cell: &FlatValue, kind: FieldKind) -> Option<Value> {
    match (kind, cell) {
        (FieldKind::Count, FlatValue::Integer(i)) => (*i >= 0).then(|| Value::from(*i)),
        (FieldKind::Count, FlatValue::Text(s)) => {
            parse_integer(s).filter(|i| *i >= 0).map(Value::from)
        }
        (FieldKind::TriState, cell) => {
            let parsed = match cell {
                FlatValue::Integer(1) => Some(true),
                FlatValue::Integer(0) => Some(false),
                FlatValue::Integer(_) => None,
                FlatValue::Text(s) => parse_boolean(s),
            };
            TriState::from(parsed).as_str().map(Value::from)
        }
        (FieldKind::List, cell) => parse_list(&cell.to_string())
            .map(|items| Value::Array(items.into_iter().map(Value::String).collect())),
        (FieldKind::Keyword | FieldKind::Text, cell) => {
            let text = cell.to_string();
            let text = text.trim();
            (!text.is_empty()).then(|| Value::String(text.to_string()))
        }
    }
}

/// `true/yes/1` and `false/no/0`, case-insensitive. Anything else is unknown.
pub fn parse_boolean(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Numeric coercion; decimals are truncated. Non-numeric input is unknown.
pub fn parse_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(i);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f as i64)
}

/// Split on `|` (or legacy `;`). Blank input is absent, which is distinct
/// from an explicit list with no items.
pub fn parse_list(raw: &str) -> Option<Vec<String>> {
    if raw.trim().is_empty() {
        return None;
    }
    Some(
        raw.split([LIST_SEPARATOR, LEGACY_LIST_SEPARATOR])
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

// =============================================================================
// CLEANING
// =============================================================================

/// Drop every null, blank string, empty list and empty object at any depth.
/// Idempotent.
pub fn clean_document(document: Document) -> Document {
    document
        .into_iter()
        .filter_map(|(key, value)| clean_value(value).map(|value| (key, value)))
        .collect()
}

fn clean_value(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::Array(items) => {
            let items: Vec<Value> = items.into_iter().filter_map(clean_value).collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        Value::Object(map) => {
            let map = clean_document(map);
            (!map.is_empty()).then_some(Value::Object(map))
        }
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::bucket::RangeLabel;
    use crate::catalog::schema::{SCHEMA, TYPE_OF_COHORT};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn full_record() -> MetadataRecord {
        let mut record = MetadataRecord::new("Nordic Biobank");
        record.pi_lead = Some("Dr. Site Lead".into());
        record.website = Some("https://site-1.example.org".into());
        record.countries = vec!["Sweden".into(), "Norway".into()];
        record.current_enrollment = Some(1000);
        record.target_enrollment = Some(2000);
        record.dictionary_harmonized = TriState::Yes;
        record.irb_approved_data_sharing = Some(RangeLabel::Most);
        record.enrollment_period = Some("2010:-".into());

        for group in SCHEMA.groups {
            for (i, key) in group.keys.iter().enumerate() {
                let key = key.to_string();
                match group.name {
                    "available_data_types" => {
                        record.available_data_types.insert(key, RangeLabel::ALL[i % 5]);
                    }
                    "cohort_ancestry" => {
                        record.cohort_ancestry.insert(key, RangeLabel::ALL[(i + 2) % 5]);
                    }
                    "type_of_cohort" => {
                        record.type_of_cohort.insert(key, TriState::from(i % 2 == 0));
                    }
                    "questionnaire_survey_data" => {
                        record.questionnaire_survey_data.insert(key, vec![format!("Q{}", i), "Cancer".into()]);
                    }
                    "laboratory_measures" => {
                        record.laboratory_measures.insert(key, vec![format!("L{}", i)]);
                    }
                    _ => {
                        record.biosample.insert(key, vec!["Blood".into(), "DNA".into()]);
                    }
                }
            }
        }
        record
    }

    #[test]
    fn test_roundtrip_full_record() {
        let record = full_record();
        let flat = flatten(&record);
        let rebuilt = unflatten(&flat);

        assert_eq!(rebuilt, clean_document(record.to_document()));
        assert_eq!(MetadataRecord::from_document(rebuilt).unwrap(), record);
    }

    #[test]
    fn test_roundtrip_drops_empty_sequences() {
        let mut record = full_record();
        record.questionnaire_survey_data.insert("medication".into(), Vec::new());

        let flat = flatten(&record);
        assert!(!flat.contains_key("questionnaire_survey_data_medication"));
        assert_eq!(unflatten(&flat), clean_document(record.to_document()));
    }

    #[test]
    fn test_flatten_naming_and_joining() {
        let record = full_record();
        let flat = flatten(&record);

        assert_eq!(flat["cohort_name"], FlatValue::from("Nordic Biobank"));
        assert_eq!(flat["countries"], FlatValue::from("Sweden|Norway"));
        assert_eq!(flat["current_enrollment"], FlatValue::Integer(1000));
        assert_eq!(flat["dictionary_harmonized"], FlatValue::from("Yes"));
        assert_eq!(flat["biosample_sample_types"], FlatValue::from("Blood|DNA"));
        assert_eq!(flat["available_data_types_biospecimens"], FlatValue::from("0%"));
        assert!(flat.contains_key("type_of_cohort_case_control"));
    }

    #[test]
    fn test_flatten_omits_absent_fields() {
        let flat = flatten(&MetadataRecord::new("Solo"));
        assert_eq!(flat.len(), 1);
        assert_eq!(flat["cohort_name"], FlatValue::from("Solo"));
    }

    #[test]
    fn test_blank_list_items_are_omitted() {
        let mut record = MetadataRecord::new("X");
        record.countries = vec!["".into(), "  ".into()];
        record.biosample.insert("sample_types".into(), vec!["".into(), "Blood".into()]);

        let flat = flatten(&record);
        assert!(!flat.contains_key("countries"));
        assert_eq!(flat["biosample_sample_types"], FlatValue::from("Blood"));
    }

    #[test]
    fn test_item_with_separator_splits_on_import() {
        let mut record = MetadataRecord::new("X");
        record
            .questionnaire_survey_data
            .insert("medication".into(), vec!["Heart; lungs".into()]);

        let flat = flatten(&record);
        assert_eq!(flat["questionnaire_survey_data_medication"], FlatValue::from("Heart; lungs"));
        assert_eq!(
            unflatten(&flat)["questionnaire_survey_data"]["medication"],
            json!(["Heart", "lungs"])
        );
    }

    #[test]
    fn test_list_separator_equivalence() {
        let mut legacy = FlatRow::new();
        legacy.insert("cohort_name".into(), "x".into());
        legacy.insert("countries".into(), "A;B|C".into());
        let mut canonical = legacy.clone();
        canonical.insert("countries".into(), "A|B|C".into());

        assert_eq!(unflatten(&legacy), unflatten(&canonical));
        assert_eq!(unflatten(&legacy)["countries"], json!(["A", "B", "C"]));

        let flat = flatten_document(&unflatten(&legacy));
        assert_eq!(flat["countries"], FlatValue::from("A|B|C"));
    }

    #[test]
    fn test_parse_list_absent_vs_empty() {
        assert_eq!(parse_list(""), None);
        assert_eq!(parse_list("   "), None);
        assert_eq!(parse_list("|"), Some(vec![]));
        assert_eq!(parse_list(" a ; b "), Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_parse_boolean_table() {
        for raw in ["true", "YES", "Yes", "1", " yes "] {
            assert_eq!(parse_boolean(raw), Some(true), "{}", raw);
        }
        for raw in ["false", "No", "0", "NO"] {
            assert_eq!(parse_boolean(raw), Some(false), "{}", raw);
        }
        for raw in ["", "maybe", "2", "y"] {
            assert_eq!(parse_boolean(raw), None, "{}", raw);
        }
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("42.9"), Some(42));
        assert_eq!(parse_integer(" 7.0 "), Some(7));
        assert_eq!(parse_integer("n/a"), None);
        assert_eq!(parse_integer(""), None);
        assert_eq!(parse_integer("NaN"), None);
    }

    #[test]
    fn test_unparseable_cells_become_absent() {
        let mut row = FlatRow::new();
        row.insert("cohort_name".into(), "Penn Biobank".into());
        row.insert("dictionary_harmonized".into(), "perhaps".into());
        row.insert("current_enrollment".into(), "lots".into());
        row.insert("target_enrollment".into(), "-5".into());
        row.insert(format!("{}_longitudinal", TYPE_OF_COHORT), "TRUE".into());
        row.insert(format!("{}_other", TYPE_OF_COHORT), "??".into());

        let doc = unflatten(&row);
        assert_eq!(
            Value::Object(doc),
            json!({
                "cohort_name": "Penn Biobank",
                "type_of_cohort": { "longitudinal": "Yes" },
            })
        );
    }

    #[test]
    fn test_alias_resolution_first_match_wins() {
        let mut row = FlatRow::new();
        row.insert("name".into(), "Legacy Cohort".into());
        row.insert("pi".into(), "Dr. Old".into());
        row.insert("genomic_data".into(), "26-50%".into());
        row.insert("available_data_types_imaging_data".into(), "1-25%".into());
        row.insert("imaging_data".into(), "76-100%".into());

        let doc = unflatten(&row);
        assert_eq!(doc["cohort_name"], json!("Legacy Cohort"));
        assert_eq!(doc["pi_lead"], json!("Dr. Old"));
        assert_eq!(doc["available_data_types"]["genomic_data"], json!("26-50%"));
        assert_eq!(doc["available_data_types"]["imaging_data"], json!("1-25%"));
    }

    #[test]
    fn test_blank_canonical_cell_falls_through_to_alias() {
        let mut row = FlatRow::new();
        row.insert("cohort_name".into(), "".into());
        row.insert("name".into(), "Fallback".into());

        assert_eq!(unflatten(&row)["cohort_name"], json!("Fallback"));
    }

    #[test]
    fn test_clean_document_nested() {
        let doc = json!({
            "cohort_name": "x",
            "website": "",
            "countries": [],
            "biosample": { "sample_types": null, "biosample_variables": [""] },
            "cohort_ancestry": { "asian": "1-25%", "other": null },
        });
        let Value::Object(doc) = doc else { unreachable!() };

        let cleaned = clean_document(doc);
        assert_eq!(
            Value::Object(cleaned.clone()),
            json!({ "cohort_name": "x", "cohort_ancestry": { "asian": "1-25%" } })
        );
        assert_eq!(clean_document(cleaned.clone()), cleaned);
    }

    #[test]
    fn test_empty_row_unflattens_to_empty_document() {
        assert!(unflatten(&FlatRow::new()).is_empty());
    }
}
