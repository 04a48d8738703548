//! Catalog schema description
//!
//! A fixed description of every field a cohort document may carry. The
//! flat column names derived here are the contract downstream consumers key
//! on: top-level fields keep their bare name, group keys become
//! `<group>_<key>`.

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

/// How a field is stored and parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Exact-match string (range labels included)
    Keyword,
    /// Full-text searchable string
    Text,
    /// Non-negative integer
    Count,
    /// Yes / No / unknown
    TriState,
    /// Ordered sequence of strings, `|`-joined when flat
    List,
}

impl FieldKind {
    /// Document-store field type
    pub fn store_type(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Count => "integer",
            FieldKind::Keyword | FieldKind::TriState | FieldKind::List => "keyword",
        }
    }
}

#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Legacy column names accepted on import, tried in order
    pub aliases: &'static [&'static str],
}

#[derive(Debug)]
pub struct GroupSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub keys: &'static [&'static str],
    /// Older exports wrote this group's columns without the group prefix
    pub bare_key_alias: bool,
}

#[derive(Debug)]
pub struct Schema {
    pub fields: &'static [FieldSpec],
    pub groups: &'static [GroupSpec],
}

pub const AVAILABLE_DATA_TYPES: &str = "available_data_types";
pub const COHORT_ANCESTRY: &str = "cohort_ancestry";
pub const TYPE_OF_COHORT: &str = "type_of_cohort";
pub const QUESTIONNAIRE_SURVEY_DATA: &str = "questionnaire_survey_data";
pub const LABORATORY_MEASURES: &str = "laboratory_measures";
pub const BIOSAMPLE: &str = "biosample";

pub static SCHEMA: Schema = Schema {
    fields: &[
        FieldSpec { name: "cohort_name", kind: FieldKind::Keyword, aliases: &["name"] },
        FieldSpec { name: "pi_lead", kind: FieldKind::Text, aliases: &["pi"] },
        FieldSpec { name: "website", kind: FieldKind::Keyword, aliases: &[] },
        FieldSpec { name: "countries", kind: FieldKind::List, aliases: &[] },
        FieldSpec { name: "current_enrollment", kind: FieldKind::Count, aliases: &[] },
        FieldSpec { name: "target_enrollment", kind: FieldKind::Count, aliases: &[] },
        FieldSpec { name: "enrollment_period", kind: FieldKind::Keyword, aliases: &[] },
        FieldSpec { name: "dictionary_harmonized", kind: FieldKind::TriState, aliases: &[] },
        FieldSpec { name: "irb_approved_data_sharing", kind: FieldKind::Keyword, aliases: &[] },
    ],
    groups: &[
        GroupSpec {
            name: AVAILABLE_DATA_TYPES,
            kind: FieldKind::Keyword,
            keys: &[
                "biospecimens",
                "genomic_data",
                "genomic_data_wgs",
                "genomic_data_wes",
                "genomic_data_array",
                "genomic_data_other",
                "demographic_data",
                "imaging_data",
                "participants_address_or_geocode_data",
                "electronic_health_record_data",
                "phenotypic_clinical_data",
            ],
            bare_key_alias: true,
        },
        GroupSpec {
            name: COHORT_ANCESTRY,
            kind: FieldKind::Keyword,
            keys: &[
                "asian",
                "black_african_american_or_african",
                "european_or_white",
                "hispanic_latino_or_spanish",
                "middle_eastern_or_north_african",
                "other",
            ],
            bare_key_alias: false,
        },
        GroupSpec {
            name: TYPE_OF_COHORT,
            kind: FieldKind::TriState,
            keys: &["case_control", "cross_sectional", "longitudinal", "health_records", "other"],
            bare_key_alias: false,
        },
        GroupSpec {
            name: QUESTIONNAIRE_SURVEY_DATA,
            kind: FieldKind::List,
            keys: &[
                "diseases",
                "healthcare_information",
                "lifestyle_and_behaviours",
                "medication",
                "non_pharmacological_interventions",
                "perception_of_health_and_quality_of_life",
                "physical_environment",
                "physiological_measurements",
                "socio_demographic_and_economic_characteristics",
                "survey_administration",
                "other_questionnaire_survey_data",
            ],
            bare_key_alias: false,
        },
        GroupSpec {
            name: LABORATORY_MEASURES,
            kind: FieldKind::List,
            keys: &["genomic_variables", "microbiology"],
            bare_key_alias: false,
        },
        GroupSpec {
            name: BIOSAMPLE,
            kind: FieldKind::List,
            keys: &["sample_types", "biosample_variables"],
            bare_key_alias: false,
        },
    ],
};

/// Where a flat column lives in the nested document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    Top(&'static str),
    Group { group: &'static str, key: &'static str },
}

/// One flat column with everything needed to map it both ways
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub column: String,
    pub path: FieldPath,
    pub kind: FieldKind,
    pub aliases: Vec<String>,
}

impl ColumnSpec {
    /// Canonical name first, then each alias in declaration order
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.column.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

pub fn group_column(group: &str, key: &str) -> String {
    format!("{}_{}", group, key)
}

/// Every column of [`SCHEMA`], top-level fields first
pub static COLUMNS: Lazy<Vec<ColumnSpec>> = Lazy::new(|| {
    let mut columns = Vec::new();

    for field in SCHEMA.fields {
        columns.push(ColumnSpec {
            column: field.name.to_string(),
            path: FieldPath::Top(field.name),
            kind: field.kind,
            aliases: field.aliases.iter().map(|a| a.to_string()).collect(),
        });
    }

    for group in SCHEMA.groups {
        for &key in group.keys {
            let aliases = if group.bare_key_alias {
                vec![key.to_string()]
            } else {
                Vec::new()
            };
            columns.push(ColumnSpec {
                column: group_column(group.name, key),
                path: FieldPath::Group { group: group.name, key },
                kind: group.kind,
                aliases,
            });
        }
    }

    columns
});

/// Index body for the document store: settings plus typed properties
pub fn index_mapping() -> Value {
    let mut properties = Map::new();

    for field in SCHEMA.fields {
        properties.insert(field.name.to_string(), json!({ "type": field.kind.store_type() }));
    }

    for group in SCHEMA.groups {
        let mut nested = Map::new();
        for key in group.keys {
            nested.insert(key.to_string(), json!({ "type": group.kind.store_type() }));
        }
        properties.insert(group.name.to_string(), json!({ "properties": nested }));
    }

    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0,
        },
        "mappings": {
            "properties": properties,
        },
    })
}
