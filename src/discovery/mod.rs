//! Federated Discovery
//!
//! Collects one payload per site under a quorum policy:
//! - Site identities and per-site dataset readers
//! - Site tasks (metadata extraction, local statistics)
//! - The dispatch transport and the collect coordinator

pub mod coordinator;
pub mod dispatch;
pub mod extractor;
pub mod sites;
pub mod statistics;
pub mod task;
pub mod types;

pub use coordinator::{BatchStatus, CollectCoordinator, RoundPolicy};
pub use dispatch::LocalDispatch;
pub use extractor::{CsvDatasetReader, DatasetReader, MetadataExtractor};
pub use sites::SiteDirectory;
pub use statistics::StatisticsSummarizer;
pub use task::{SiteTask, TaskKind};
pub use types::ParticipantId;
