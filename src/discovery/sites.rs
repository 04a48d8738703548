//! Site identity lookup
//!
//! Maps a participant id to the cohort name and country it publishes under.
//! Injected into the extractor so deployments and tests can supply their own.

use crate::discovery::types::ParticipantId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const UNKNOWN_COUNTRY: &str = "Unknown";

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Failed to read site directory {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid site directory {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteIdentity {
    pub name: String,
    pub country: String,
}

#[derive(Debug, Clone, Default)]
pub struct SiteDirectory {
    entries: HashMap<ParticipantId, SiteIdentity>,
}

impl SiteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The eight demo biobanks
    pub fn builtin() -> Self {
        [
            ("site-1", "Nordic Biobank", "Sweden"),
            ("site-2", "CHoP Biobank", "United States"),
            ("site-3", "Penn Biobank", "United States"),
            ("site-4", "Japan Biobank", "Japan"),
            ("site-5", "AWS Open Data Program", "Global"),
            ("site-6", "CanPath", "Canada"),
            ("site-7", "Sage NF1 data", "United States"),
            ("site-8", "QIAGEN", "Germany"),
        ]
        .into_iter()
        .fold(Self::new(), |directory, (id, name, country)| {
            directory.with_site(id, name, country)
        })
    }

    /// Load `{ "site-1": { "name": "...", "country": "..." }, ... }`
    pub fn from_json_file(path: &Path) -> Result<Self, DirectoryError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| DirectoryError::Read {
            path: display.clone(),
            source,
        })?;
        let entries: HashMap<ParticipantId, SiteIdentity> = serde_json::from_str(&content)
            .map_err(|source| DirectoryError::Parse {
                path: display,
                source,
            })?;
        Ok(Self { entries })
    }

    pub fn with_site(
        mut self,
        id: impl Into<ParticipantId>,
        name: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            id.into(),
            SiteIdentity {
                name: name.into(),
                country: country.into(),
            },
        );
        self
    }

    /// Known identity, or `Site <id>` in an unknown country
    pub fn resolve(&self, participant: &ParticipantId) -> SiteIdentity {
        self.entries.get(participant).cloned().unwrap_or_else(|| SiteIdentity {
            name: format!("Site {}", participant),
            country: UNKNOWN_COUNTRY.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
