//! PaperMap ingestion
//!
//! Incremental harvesting of paper metadata from a paginated search API:
//! fetch, normalize, store, then classify whatever is still unlabelled.

pub mod classifier;
pub mod errors;
pub mod fetcher;
pub mod normalizer;
pub mod pipeline;

pub use classifier::{Classifier, Label, ZeroShotClassifier};
pub use errors::{IngestionError, Result};
pub use fetcher::{FetchOutcome, IeeeXploreClient, PaperSource, RawRecord};
pub use normalizer::{normalize, normalize_page, NormalizedPage};
pub use pipeline::{CategoryReport, ClassificationReport, Exhaustion, HarvestSettings, Harvester, RunReport};
