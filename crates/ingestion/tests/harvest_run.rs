//! Full run against an in-memory store with a stubbed source and classifier

use async_trait::async_trait;
use papermap_common::config::ClassificationMode;
use papermap_common::{DbPool, ProgressStore, Repository};
use papermap_ingestion::{
    Classifier, FetchOutcome, HarvestSettings, Harvester, Label, PaperSource, RawRecord, Result,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// One full page for offset 0, nothing afterwards
struct TwoPaperSource {
    calls: Mutex<Vec<u64>>,
}

#[async_trait]
impl PaperSource for TwoPaperSource {
    async fn fetch(&self, _query: &str, start_offset: u64, _page_size: u32) -> Result<FetchOutcome> {
        self.calls.lock().unwrap().push(start_offset);
        if start_offset > 0 {
            return Ok(FetchOutcome::Empty);
        }
        Ok(FetchOutcome::Page(vec![paper("101", "Solar forecasting"), paper("102", "Battery aging")]))
    }
}

#[derive(Default)]
struct RecordingClassifier {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl Classifier for RecordingClassifier {
    async fn classify(&self, text: &str) -> Result<Vec<Label>> {
        self.prompts.lock().unwrap().push(text.to_string());
        Ok(vec![Label::new("energy", 0.93)])
    }

    fn model_name(&self) -> &str {
        "recording"
    }
}

fn paper(id: &str, title: &str) -> RawRecord {
    json!({
        "article_number": id,
        "title": title,
        "abstract": "Grid-scale study",
        "insert_date": "20240612",
        "publication_year": 2024,
        "download_count": 3,
        "citing_patent_count": 0,
        "index_terms": {
            "author_terms": { "terms": ["storage"] },
            "ieee_terms": { "terms": ["Power grids"] },
            "dynamic_index_terms": { "terms": ["Energy"] }
        },
        "authors": { "authors": [{ "id": 1, "full_name": "Grace Author", "affiliation": "Institute", "author_order": 1 }] }
    })
}

#[tokio::test]
async fn test_empty_progress_two_records_then_empty_page() {
    let dir = tempfile::tempdir().unwrap();
    let progress = ProgressStore::new(dir.path().join("progress.json"));
    let repository = Repository::new(DbPool::in_memory().await.unwrap());
    let source = Arc::new(TwoPaperSource {
        calls: Mutex::new(Vec::new()),
    });
    let classifier = Arc::new(RecordingClassifier::default());

    let harvester = Harvester::new(
        repository.clone(),
        progress.clone(),
        source.clone(),
        classifier.clone(),
        HarvestSettings {
            categories: vec!["energy".to_string()],
            page_size: 2,
            mode: ClassificationMode::MultiLabel,
            min_confidence: 0.0,
        },
    );

    let report = harvester.run().await.unwrap();

    assert!(report.new_papers_ingested());
    assert_eq!(repository.count_papers().await.unwrap(), 2);
    assert_eq!(*source.calls.lock().unwrap(), vec![0, 2]);

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(progress.path()).unwrap()).unwrap();
    assert_eq!(on_disk, json!({ "energy": 2 }));

    let prompts = classifier.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 2);
    assert_eq!(
        prompts[0],
        "title: Solar forecasting - abstract: Grid-scale study - index_terms: storage, Power grids, Energy"
    );
    assert_eq!(report.classification.prompts, 2);
    assert!(repository.fetch_unclassified().await.unwrap().is_empty());
    assert_eq!(repository.category_counts().await.unwrap(), vec![("energy".to_string(), 2)]);

    // Second run: nothing new, nothing left to classify
    let second = harvester.run().await.unwrap();
    assert!(!second.new_papers_ingested());
    assert_eq!(classifier.prompts.lock().unwrap().len(), 2);
    assert_eq!(progress.load().offset("energy"), 2);
}
