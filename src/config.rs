//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use crate::discovery::{ParticipantId, TaskKind};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_STORE_HOST: &str = "http://localhost:9200";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Catalog API bind address
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 6060,
        }
    }
}

/// Where each site keeps its dataset
#[derive(Debug, Clone)]
pub struct DataConfig {
    pub root_dir: PathBuf,
    pub filename: String,
    /// JSON file replacing the built-in site identities
    pub site_directory: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/tmp/nvflare/cross_bio_bank"),
            filename: "patients.csv".to_string(),
            site_directory: None,
        }
    }
}

/// Collection round policy
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub sites: Vec<ParticipantId>,
    /// `None` means every site must answer
    pub min_responses: Option<usize>,
    pub grace_period: Duration,
    pub round_timeout: Duration,
    pub task: TaskKind,
    /// Export base path, extensions are added per format
    pub output_path: PathBuf,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            sites: (1..=8).map(|i| ParticipantId::new(format!("site-{}", i))).collect(),
            min_responses: None,
            grace_period: Duration::from_millis(1000),
            round_timeout: Duration::from_secs(300),
            task: TaskKind::Metadata,
            output_path: PathBuf::from("cohort_catalog"),
        }
    }
}

impl DiscoveryConfig {
    pub fn quorum(&self) -> usize {
        self.min_responses.unwrap_or(self.sites.len())
    }
}

/// Document store connection
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub hosts: Vec<Url>,
    pub index_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hosts: Url::parse(DEFAULT_STORE_HOST).into_iter().collect(),
            index_name: "cohort_centric".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn primary_host(&self) -> Result<&Url, ConfigError> {
        self.hosts
            .first()
            .ok_or_else(|| ConfigError::InvalidValue("ES_HOSTS is empty".to_string()))
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub data: DataConfig,
    pub discovery: DiscoveryConfig,
    pub store: StoreConfig,
    /// Nested export served by the API
    pub catalog_path: PathBuf,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists; a missing file is fine, a broken one is not
        match dotenvy::dotenv() {
            Err(e) if !e.not_found() => return Err(e.into()),
            _ => {}
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup, falling back to defaults per field
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server = ServerConfig {
            host: parse_or(var("HOST"), "HOST", ServerConfig::default().host)?,
            port: parse_or(var("PORT"), "PORT", ServerConfig::default().port)?,
        };

        let defaults = DataConfig::default();
        let data = DataConfig {
            root_dir: var("DATA_ROOT_DIR").map(PathBuf::from).unwrap_or(defaults.root_dir),
            filename: var("DATA_FILENAME").unwrap_or(defaults.filename),
            site_directory: var("SITE_DIRECTORY").map(PathBuf::from),
        };

        let defaults = DiscoveryConfig::default();
        let discovery = DiscoveryConfig {
            sites: var("SITES")
                .map(|s| split_list(&s).map(ParticipantId::new).collect())
                .unwrap_or(defaults.sites),
            min_responses: var("MIN_RESPONSES")
                .map(|v| parse_value::<usize>(&v, "MIN_RESPONSES"))
                .transpose()?,
            grace_period: var("GRACE_PERIOD_MS")
                .map(|v| parse_value(&v, "GRACE_PERIOD_MS").map(Duration::from_millis))
                .transpose()?
                .unwrap_or(defaults.grace_period),
            round_timeout: var("ROUND_TIMEOUT_SECS")
                .map(|v| parse_value(&v, "ROUND_TIMEOUT_SECS").map(Duration::from_secs))
                .transpose()?
                .unwrap_or(defaults.round_timeout),
            task: var("SITE_TASK")
                .map(|v| v.parse::<TaskKind>().map_err(ConfigError::InvalidValue))
                .transpose()?
                .unwrap_or(defaults.task),
            output_path: var("OUTPUT_PATH").map(PathBuf::from).unwrap_or(defaults.output_path),
        };

        let store = StoreConfig {
            hosts: match var("ES_HOSTS") {
                Some(hosts) => split_list(&hosts)
                    .map(|h| {
                        Url::parse(h).map_err(|e| ConfigError::InvalidValue(format!("ES_HOSTS entry '{}': {}", h, e)))
                    })
                    .collect::<Result<_, _>>()?,
                None => StoreConfig::default().hosts,
            },
            index_name: var("COHORT_INDEX_NAME").unwrap_or_else(|| StoreConfig::default().index_name),
        };

        let catalog_path = var("CATALOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("cohort_catalog.json"));

        let settings = Self {
            server,
            data,
            discovery,
            store,
            catalog_path,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.sites.is_empty() {
            return Err(ConfigError::InvalidValue("SITES lists no participants".to_string()));
        }
        if self.store.hosts.is_empty() {
            return Err(ConfigError::InvalidValue("ES_HOSTS is empty".to_string()));
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_value<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{} = '{}'", key, raw)))
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    raw.map(|v| parse_value(&v, key)).transpose().map(|v| v.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]).unwrap();

        assert_eq!(settings.server.port, 6060);
        assert_eq!(settings.discovery.sites.len(), 8);
        assert_eq!(settings.discovery.quorum(), 8);
        assert_eq!(settings.discovery.grace_period, Duration::from_secs(1));
        assert_eq!(settings.discovery.task, TaskKind::Metadata);
        assert_eq!(settings.store.index_name, "cohort_centric");
        assert_eq!(settings.store.primary_host().unwrap().as_str(), "http://localhost:9200/");
        assert_eq!(settings.catalog_path, PathBuf::from("cohort_catalog.json"));
    }

    #[test]
    fn test_overrides() {
        let settings = settings_from(&[
            ("SITES", "site-1, site-3 ,"),
            ("MIN_RESPONSES", "1"),
            ("GRACE_PERIOD_MS", "250"),
            ("SITE_TASK", "statistics"),
            ("ES_HOSTS", "http://es-1:9200,http://es-2:9200"),
        ])
        .unwrap();

        assert_eq!(
            settings.discovery.sites,
            vec![ParticipantId::from("site-1"), ParticipantId::from("site-3")]
        );
        assert_eq!(settings.discovery.quorum(), 1);
        assert_eq!(settings.discovery.grace_period, Duration::from_millis(250));
        assert_eq!(settings.discovery.task, TaskKind::Statistics);
        assert_eq!(settings.store.hosts.len(), 2);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(settings_from(&[("PORT", "http")]), Err(ConfigError::InvalidValue(_))));
        assert!(matches!(settings_from(&[("MIN_RESPONSES", "-1")]), Err(ConfigError::InvalidValue(_))));
        assert!(matches!(settings_from(&[("ES_HOSTS", "not a url")]), Err(ConfigError::InvalidValue(_))));
        assert!(matches!(settings_from(&[("SITE_TASK", "training")]), Err(ConfigError::InvalidValue(_))));
        assert!(matches!(settings_from(&[("SITES", " , ")]), Err(ConfigError::InvalidValue(_))));
    }
}
