//! Harvest pipeline
//!
//! One [`Harvester::run`] walks every category page by page, stores what it
//! finds, persists progress after each page and finally classifies every
//! prompt that has no classification yet. Runs are sequential; the caller
//! owns scheduling.

use crate::classifier::{select_labels, Classifier};
use crate::errors::Result;
use crate::fetcher::{FetchOutcome, PaperSource, RawRecord};
use crate::normalizer::normalize_page;
use papermap_common::config::{AppConfig, ClassificationMode};
use papermap_common::db::{ClassificationRecord, InitMode, NormalizedPaper, Repository};
use papermap_common::metrics;
use papermap_common::progress::{Progress, ProgressStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Knobs for one harvester
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub categories: Vec<String>,
    pub page_size: u32,
    pub mode: ClassificationMode,
    pub min_confidence: f64,
}

impl HarvestSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            categories: config.harvest.categories.clone(),
            page_size: config.source.page_size,
            mode: config.classifier.mode,
            min_confidence: config.classifier.min_confidence,
        }
    }
}

/// Why a category stopped for this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exhaustion {
    /// The source had nothing at the current offset
    EmptyPage,
    /// The last page was shorter than requested
    ShortPage,
    /// The fetch failed; progress was not advanced
    FetchFailed,
    /// The page was stored but progress could not be written
    ProgressNotSaved,
}

enum CategoryState {
    Fetching,
    Normalizing(Vec<RawRecord>),
    Storing { papers: Vec<NormalizedPaper>, fetched: usize },
    Exhausted(Exhaustion),
}

/// Per-category tallies for one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryReport {
    pub category: String,
    pub start_offset: u64,
    pub final_offset: u64,
    pub pages: usize,
    pub records: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub partial: usize,
    pub failed: usize,
    pub malformed: usize,
    pub exhaustion: Option<Exhaustion>,
}

impl CategoryReport {
    fn new(category: &str, start_offset: u64) -> Self {
        Self {
            category: category.to_string(),
            start_offset,
            final_offset: start_offset,
            pages: 0,
            records: 0,
            inserted: 0,
            duplicates: 0,
            partial: 0,
            failed: 0,
            malformed: 0,
            exhaustion: None,
        }
    }

    /// Papers whose row was newly written, complete or not
    pub fn stored(&self) -> usize {
        self.inserted + self.partial
    }
}

/// Classification phase tallies
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub prompts: usize,
    pub classified: usize,
    pub rows_stored: usize,
    pub failed: usize,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub categories: Vec<CategoryReport>,
    pub classification: ClassificationReport,
    pub duration: Duration,
}

impl RunReport {
    /// Whether this run stored at least one new paper
    pub fn new_papers_ingested(&self) -> bool {
        self.papers_stored() > 0
    }

    pub fn papers_stored(&self) -> usize {
        self.categories.iter().map(CategoryReport::stored).sum()
    }

    pub fn category(&self, name: &str) -> Option<&CategoryReport> {
        self.categories.iter().find(|c| c.category == name)
    }
}

/// Pipeline orchestrator
pub struct Harvester {
    repository: Repository,
    progress_store: ProgressStore,
    source: Arc<dyn PaperSource>,
    classifier: Arc<dyn Classifier>,
    settings: HarvestSettings,
}

impl Harvester {
    pub fn new(
        repository: Repository,
        progress_store: ProgressStore,
        source: Arc<dyn PaperSource>,
        classifier: Arc<dyn Classifier>,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            repository,
            progress_store,
            source,
            classifier,
            settings,
        }
    }

    /// Build from configuration
    pub fn from_config(
        config: &AppConfig,
        repository: Repository,
        source: Arc<dyn PaperSource>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self::new(
            repository,
            ProgressStore::new(&config.harvest.progress_path),
            source,
            classifier,
            HarvestSettings::from_config(config),
        )
    }

    /// Execute one full run: harvest every category, then classify.
    ///
    /// Only store initialization and the unclassified-prompt query are
    /// fatal; every other failure is logged and confined to its category or
    /// paper.
    #[instrument(skip(self), fields(run_id = tracing::field::Empty))]
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let started = Instant::now();

        info!(categories = self.settings.categories.len(), page_size = self.settings.page_size, "Starting run");

        self.repository.initialize(InitMode::CreateIfMissing).await?;

        let mut progress = self.progress_store.load();
        let mut categories = Vec::with_capacity(self.settings.categories.len());
        for category in &self.settings.categories {
            categories.push(self.harvest_category(category, &mut progress).await);
        }

        let classification = self.classify_pending().await?;

        let report = RunReport {
            run_id,
            categories,
            classification,
            duration: started.elapsed(),
        };

        metrics::record_run(report.duration.as_secs_f64(), report.new_papers_ingested());
        info!(
            papers_stored = report.papers_stored(),
            classified = report.classification.classified,
            duration_ms = report.duration.as_millis() as u64,
            "Run complete"
        );

        Ok(report)
    }

    #[instrument(skip(self, progress))]
    async fn harvest_category(&self, category: &str, progress: &mut Progress) -> CategoryReport {
        let page_size = self.settings.page_size;
        let mut report = CategoryReport::new(category, progress.offset(category));
        let mut state = CategoryState::Fetching;

        loop {
            state = match state {
                CategoryState::Fetching => {
                    let offset = progress.offset(category);
                    match self.source.fetch(category, offset, page_size).await {
                        Ok(FetchOutcome::Page(records)) => {
                            report.pages += 1;
                            report.records += records.len();
                            metrics::record_page(category, records.len(), offset);
                            CategoryState::Normalizing(records)
                        }
                        Ok(FetchOutcome::Empty) => {
                            metrics::record_page(category, 0, offset);
                            CategoryState::Exhausted(Exhaustion::EmptyPage)
                        }
                        Err(e) => {
                            error!(offset, error = %e, "Fetch failed, abandoning category for this run");
                            metrics::record_fetch_error(category);
                            CategoryState::Exhausted(Exhaustion::FetchFailed)
                        }
                    }
                }

                CategoryState::Normalizing(records) => {
                    let fetched = records.len();
                    let page = normalize_page(records);
                    report.malformed += page.rejected.len();
                    metrics::record_malformed(category, page.rejected.len());
                    CategoryState::Storing {
                        papers: page.papers,
                        fetched,
                    }
                }

                CategoryState::Storing { papers, fetched } => {
                    let batch = self.repository.insert_papers(&papers).await;
                    for row in &batch.rows {
                        metrics::record_insert(row.outcome.as_ref().map(|o| o.label()).unwrap_or("failed"));
                    }
                    report.inserted += batch.inserted();
                    report.duplicates += batch.duplicates();
                    report.partial += batch.partial();
                    report.failed += batch.failed().count();

                    let next = progress.offset(category) + u64::from(page_size);
                    progress.advance_to(category, next);

                    if let Err(e) = self.progress_store.save(progress) {
                        error!(offset = next, error = %e, "Failed to persist progress, stopping category");
                        CategoryState::Exhausted(Exhaustion::ProgressNotSaved)
                    } else if fetched < page_size as usize {
                        CategoryState::Exhausted(Exhaustion::ShortPage)
                    } else {
                        CategoryState::Fetching
                    }
                }

                CategoryState::Exhausted(reason) => {
                    report.exhaustion = Some(reason);
                    report.final_offset = progress.offset(category);
                    break;
                }
            };
        }

        info!(
            pages = report.pages,
            inserted = report.inserted,
            duplicates = report.duplicates,
            partial = report.partial,
            malformed = report.malformed,
            final_offset = report.final_offset,
            exhaustion = ?report.exhaustion,
            "Category done"
        );

        report
    }

    /// Classify every prompt without a classification row
    async fn classify_pending(&self) -> Result<ClassificationReport> {
        let prompts = self.repository.fetch_unclassified().await?;
        let mut report = ClassificationReport {
            prompts: prompts.len(),
            ..Default::default()
        };

        if prompts.is_empty() {
            info!("No unclassified prompts, nothing to classify");
            return Ok(report);
        }

        info!(prompts = prompts.len(), model = self.classifier.model_name(), "Classifying pending prompts");

        for prompt in prompts {
            let started = Instant::now();
            let labels = match self.classifier.classify(&prompt.prompt_text).await {
                Ok(labels) => labels,
                Err(e) => {
                    warn!(paper_id = prompt.paper_id, error = %e, "Classification failed, will retry next run");
                    metrics::record_classification(
                        started.elapsed().as_secs_f64(),
                        self.classifier.model_name(),
                        0,
                        false,
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let records: Vec<ClassificationRecord> =
                select_labels(labels, self.settings.mode, self.settings.min_confidence)
                    .into_iter()
                    .map(|label| ClassificationRecord {
                        paper_id: prompt.paper_id,
                        category: label.category,
                        confidence: label.confidence,
                    })
                    .collect();

            if records.is_empty() {
                warn!(paper_id = prompt.paper_id, "Classifier returned no labels");
                report.failed += 1;
                continue;
            }

            match self.repository.append_classifications(&records).await {
                Ok(stored) => {
                    metrics::record_classification(
                        started.elapsed().as_secs_f64(),
                        self.classifier.model_name(),
                        stored,
                        true,
                    );
                    report.classified += 1;
                    report.rows_stored += stored;
                }
                Err(e) => {
                    error!(paper_id = prompt.paper_id, error = %e, "Failed to store classifications");
                    report.failed += 1;
                }
            }
        }

        info!(
            classified = report.classified,
            rows = report.rows_stored,
            failed = report.failed,
            "Classification done"
        );

        Ok(report)
    }
}
