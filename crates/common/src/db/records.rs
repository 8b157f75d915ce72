//! Typed records exchanged between the normalizer, the orchestrator and the
//! repository.

use crate::errors::AppError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Origin of an index term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermType {
    /// Keywords supplied by the authors
    Author,
    /// Controlled-vocabulary subject terms assigned by the index
    Subject,
    /// Machine-generated terms
    Dynamic,
}

impl TermType {
    /// Prompt order: author, subject, dynamic
    pub const ALL: [TermType; 3] = [TermType::Author, TermType::Subject, TermType::Dynamic];

    pub fn as_str(&self) -> &'static str {
        match self {
            TermType::Author => "author",
            TermType::Subject => "subject",
            TermType::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for TermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TermType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "author" => Ok(TermType::Author),
            "subject" => Ok(TermType::Subject),
            "dynamic" => Ok(TermType::Dynamic),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown term type '{}'", other),
            }),
        }
    }
}

/// One author as listed on a paper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub external_id: Option<String>,
    pub full_name: String,
    pub affiliation: Option<String>,
}

/// A paper flattened into relational rows, ready for the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPaper {
    pub external_id: String,
    pub insert_date: Option<NaiveDate>,
    pub publication_year: Option<i32>,
    pub download_count: i64,
    pub citing_patent_count: i64,
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<AuthorRecord>,
    pub author_terms: Vec<String>,
    pub subject_terms: Vec<String>,
    pub dynamic_terms: Vec<String>,
    pub prompt: String,
}

impl NormalizedPaper {
    pub fn terms(&self, term_type: TermType) -> &[String] {
        match term_type {
            TermType::Author => &self.author_terms,
            TermType::Subject => &self.subject_terms,
            TermType::Dynamic => &self.dynamic_terms,
        }
    }

    /// All index terms in prompt order, tagged with their type
    pub fn index_terms(&self) -> impl Iterator<Item = (TermType, &str)> + '_ {
        TermType::ALL
            .into_iter()
            .flat_map(move |t| self.terms(t).iter().map(move |term| (t, term.as_str())))
    }
}

/// One row to append to the classification table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub paper_id: i32,
    pub category: String,
    pub confidence: f64,
}

/// A dependent row that could not be written after its paper was stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentFailure {
    pub table: &'static str,
    pub row: String,
    pub error: String,
}

/// Result of storing one normalized paper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Paper and every dependent row written
    Inserted { paper_id: i32 },
    /// External identifier already stored; nothing written
    Duplicate,
    /// Paper written, some dependents missing; the paper row is kept
    Partial {
        paper_id: i32,
        failures: Vec<DependentFailure>,
    },
}

impl InsertOutcome {
    pub fn paper_id(&self) -> Option<i32> {
        match self {
            InsertOutcome::Inserted { paper_id } | InsertOutcome::Partial { paper_id, .. } => Some(*paper_id),
            InsertOutcome::Duplicate => None,
        }
    }

    /// Label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            InsertOutcome::Inserted { .. } => "inserted",
            InsertOutcome::Duplicate => "duplicate",
            InsertOutcome::Partial { .. } => "partial",
        }
    }
}

/// Per-row result inside a batch
#[derive(Debug)]
pub struct RowReport {
    pub external_id: String,
    pub outcome: Result<InsertOutcome, AppError>,
}

/// Aggregated per-row results of a batch insert
#[derive(Debug, Default)]
pub struct BatchReport {
    pub rows: Vec<RowReport>,
}

impl BatchReport {
    pub fn push(&mut self, external_id: impl Into<String>, outcome: Result<InsertOutcome, AppError>) {
        self.rows.push(RowReport {
            external_id: external_id.into(),
            outcome,
        });
    }

    fn count(&self, pred: impl Fn(&InsertOutcome) -> bool) -> usize {
        self.rows
            .iter()
            .filter(|r| r.outcome.as_ref().map(&pred).unwrap_or(false))
            .count()
    }

    /// Rows whose paper row is newly stored (complete or partial)
    pub fn stored(&self) -> usize {
        self.count(|o| o.paper_id().is_some())
    }

    pub fn inserted(&self) -> usize {
        self.count(|o| matches!(o, InsertOutcome::Inserted { .. }))
    }

    pub fn duplicates(&self) -> usize {
        self.count(|o| matches!(o, InsertOutcome::Duplicate))
    }

    pub fn partial(&self) -> usize {
        self.count(|o| matches!(o, InsertOutcome::Partial { .. }))
    }

    /// Rows whose paper row itself could not be written
    pub fn failed(&self) -> impl Iterator<Item = (&str, &AppError)> {
        self.rows
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (r.external_id.as_str(), e)))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper() -> NormalizedPaper {
        NormalizedPaper {
            external_id: "1".into(),
            insert_date: None,
            publication_year: None,
            download_count: 0,
            citing_patent_count: 0,
            title: "T".into(),
            abstract_text: "A".into(),
            authors: vec![],
            author_terms: vec!["x".into()],
            subject_terms: vec!["y".into(), "y2".into()],
            dynamic_terms: vec!["z".into()],
            prompt: String::new(),
        }
    }

    #[test]
    fn test_index_terms_keep_prompt_order() {
        let p = paper();
        let terms: Vec<_> = p.index_terms().collect();
        assert_eq!(
            terms,
            vec![
                (TermType::Author, "x"),
                (TermType::Subject, "y"),
                (TermType::Subject, "y2"),
                (TermType::Dynamic, "z"),
            ]
        );
    }

    #[test]
    fn test_term_type_round_trips_through_str() {
        for t in TermType::ALL {
            assert_eq!(t.as_str().parse::<TermType>().unwrap(), t);
        }
        assert!("ieee".parse::<TermType>().is_err());
    }

    #[test]
    fn test_batch_report_counts() {
        let mut report = BatchReport::default();
        report.push("a", Ok(InsertOutcome::Inserted { paper_id: 1 }));
        report.push("b", Ok(InsertOutcome::Duplicate));
        report.push(
            "c",
            Ok(InsertOutcome::Partial {
                paper_id: 2,
                failures: vec![],
            }),
        );
        report.push(
            "d",
            Err(AppError::Internal {
                message: "boom".into(),
            }),
        );

        assert_eq!(report.len(), 4);
        assert_eq!(report.inserted(), 1);
        assert_eq!(report.duplicates(), 1);
        assert_eq!(report.partial(), 1);
        assert_eq!(report.stored(), 2);
        assert_eq!(report.failed().map(|(id, _)| id).collect::<Vec<_>>(), vec!["d"]);
    }
}
