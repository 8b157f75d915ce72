//! Repository for the relational store
//!
//! Owns the five tables and enforces the ingestion rules:
//! - papers are keyed by their external identifier and never updated
//! - dependents are written after their paper, one row at a time, and a
//!   failing dependent is reported without rolling the paper back
//! - classifications are pure appends, only for papers that have a prompt

use crate::db::models::*;
use crate::db::records::{
    BatchReport, ClassificationRecord, DependentFailure, InsertOutcome, NormalizedPaper,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    NotSet, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Schema, Set, SqlErr, Statement,
};
use std::collections::HashSet;
use tracing::{debug, error, info, instrument, warn};

/// How `initialize` treats an existing store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// Create whatever tables are missing; never drop anything
    CreateIfMissing,
    /// Expect a blank database; fail if any store table already exists
    Fresh,
}

const UNCLASSIFIED_SQL: &str = r#"
    SELECT pr.paper_id, pr.prompt_text
    FROM prompts pr
    WHERE NOT EXISTS (
        SELECT 1 FROM classification c WHERE c.paper_id = pr.paper_id
    )
    ORDER BY pr.paper_id
"#;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    fn backend(&self) -> DbBackend {
        self.conn().get_database_backend()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Create the store tables.
    ///
    /// `CreateIfMissing` is idempotent. `Fresh` refuses to touch a database
    /// that already holds any store table.
    #[instrument(skip(self))]
    pub async fn initialize(&self, mode: InitMode) -> Result<()> {
        if mode == InitMode::Fresh {
            let existing = self.existing_tables().await?;
            if !existing.is_empty() {
                error!(tables = ?existing, "Refusing to initialize over a live store");
                return Err(AppError::StoreAlreadyExists { tables: existing });
            }
        }

        let backend = self.backend();
        let schema = Schema::new(backend);

        // Parents first so foreign keys resolve
        let mut statements = vec![
            schema.create_table_from_entity(PaperEntity),
            schema.create_table_from_entity(AuthorEntity),
            schema.create_table_from_entity(IndexTermEntity),
            schema.create_table_from_entity(PromptEntity),
            schema.create_table_from_entity(ClassificationEntity),
        ];

        for stmt in statements.iter_mut() {
            stmt.if_not_exists();
            self.conn().execute(backend.build(&*stmt)).await?;
        }

        debug!("Store tables ensured");
        Ok(())
    }

    /// Which of the store tables currently exist
    pub async fn existing_tables(&self) -> Result<Vec<String>> {
        let backend = self.backend();
        let sql = match backend {
            DbBackend::Sqlite => "SELECT name FROM sqlite_master WHERE type = 'table'",
            DbBackend::Postgres => {
                "SELECT table_name::text FROM information_schema.tables WHERE table_schema = current_schema()"
            }
            _ => "SELECT table_name FROM information_schema.tables WHERE table_schema = DATABASE()",
        };

        let names: HashSet<String> = self
            .conn()
            .query_all(Statement::from_string(backend, sql))
            .await?
            .into_iter()
            .filter_map(|row| row.try_get_by_index::<String>(0).ok())
            .collect();

        Ok(TABLES
            .iter()
            .filter(|t| names.contains(**t))
            .map(|t| t.to_string())
            .collect())
    }

    // ========================================================================
    // Paper Operations
    // ========================================================================

    /// Whether a paper with this external identifier is stored
    pub async fn paper_exists(&self, external_id: &str) -> Result<bool> {
        let count = PaperEntity::find()
            .filter(PaperColumn::ExternalId.eq(external_id))
            .count(self.conn())
            .await?;
        Ok(count > 0)
    }

    /// Find paper by external identifier
    pub async fn find_paper_by_external_id(&self, external_id: &str) -> Result<Option<Paper>> {
        PaperEntity::find()
            .filter(PaperColumn::ExternalId.eq(external_id))
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Find paper by generated id
    pub async fn find_paper(&self, paper_id: i32) -> Result<Paper> {
        PaperEntity::find_by_id(paper_id)
            .one(self.conn())
            .await?
            .ok_or(AppError::PaperNotFound { id: paper_id })
    }

    pub async fn count_papers(&self) -> Result<u64> {
        PaperEntity::find().count(self.conn()).await.map_err(Into::into)
    }

    /// Store a paper with its authors, index terms and prompt.
    ///
    /// An already-stored external identifier is a no-op. An error is returned
    /// only when the paper row itself cannot be written; dependent failures
    /// come back as `InsertOutcome::Partial`.
    #[instrument(skip(self, paper), fields(external_id = %paper.external_id))]
    pub async fn insert_full_paper(&self, paper: &NormalizedPaper) -> Result<InsertOutcome> {
        if self.paper_exists(&paper.external_id).await? {
            info!("Paper already stored, skipping");
            return Ok(InsertOutcome::Duplicate);
        }

        let row = PaperActiveModel {
            paper_id: NotSet,
            external_id: Set(paper.external_id.clone()),
            insert_date: Set(paper.insert_date),
            publication_year: Set(paper.publication_year),
            download_count: Set(paper.download_count),
            citing_patent_count: Set(paper.citing_patent_count),
            title: Set(paper.title.clone()),
            abstract_text: Set(paper.abstract_text.clone()),
            created_at: Set(chrono::Utc::now().into()),
        };

        let stored = match row.insert(self.conn()).await {
            Ok(stored) => stored,
            Err(e) if is_unique_violation(&e) => {
                info!("Paper stored concurrently, skipping");
                return Ok(InsertOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        };
        let paper_id = stored.paper_id;

        let mut failures = Vec::new();

        for (position, author) in paper.authors.iter().enumerate() {
            let row = AuthorActiveModel {
                id: NotSet,
                paper_id: Set(paper_id),
                author_order: Set(position as i32 + 1),
                external_author_id: Set(author.external_id.clone()),
                full_name: Set(author.full_name.clone()),
                affiliation: Set(author.affiliation.clone()),
            };
            if let Err(e) = AuthorEntity::insert(row).exec(self.conn()).await {
                failures.push(dependent_failure("authors", format!("#{} {}", position + 1, author.full_name), e));
            }
        }

        for (term_type, term) in paper.index_terms() {
            let row = IndexTermActiveModel {
                id: NotSet,
                paper_id: Set(paper_id),
                term_type: Set(term_type.as_str().to_string()),
                term: Set(term.to_string()),
            };
            if let Err(e) = IndexTermEntity::insert(row).exec(self.conn()).await {
                failures.push(dependent_failure("index_terms", format!("{}:{}", term_type, term), e));
            }
        }

        let prompt = PromptActiveModel {
            paper_id: Set(paper_id),
            prompt_text: Set(paper.prompt.clone()),
        };
        if let Err(e) = PromptEntity::insert(prompt).exec(self.conn()).await {
            failures.push(dependent_failure("prompts", "prompt".to_string(), e));
        }

        if failures.is_empty() {
            debug!(paper_id, "Paper stored");
            Ok(InsertOutcome::Inserted { paper_id })
        } else {
            for failure in &failures {
                warn!(
                    paper_id,
                    table = failure.table,
                    row = %failure.row,
                    error = %failure.error,
                    "Dependent row insert failed; paper row kept"
                );
            }
            Ok(InsertOutcome::Partial { paper_id, failures })
        }
    }

    /// Store a batch of papers, one at a time.
    ///
    /// A failure on one row never stops the rest; every row gets an entry in
    /// the report.
    pub async fn insert_papers(&self, papers: &[NormalizedPaper]) -> BatchReport {
        let mut report = BatchReport::default();

        for paper in papers {
            let outcome = self.insert_full_paper(paper).await;
            if let Err(ref e) = outcome {
                error!(external_id = %paper.external_id, error = %e, "Failed to insert paper");
            }
            report.push(paper.external_id.clone(), outcome);
        }

        report
    }

    /// Authors of a paper in listed order
    pub async fn authors_for(&self, paper_id: i32) -> Result<Vec<Author>> {
        AuthorEntity::find()
            .filter(AuthorColumn::PaperId.eq(paper_id))
            .order_by_asc(AuthorColumn::AuthorOrder)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Index terms of a paper in insertion order
    pub async fn index_terms_for(&self, paper_id: i32) -> Result<Vec<IndexTerm>> {
        IndexTermEntity::find()
            .filter(IndexTermColumn::PaperId.eq(paper_id))
            .order_by_asc(IndexTermColumn::Id)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    pub async fn prompt_for(&self, paper_id: i32) -> Result<Option<Prompt>> {
        PromptEntity::find_by_id(paper_id)
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Classification Operations
    // ========================================================================

    /// Prompts whose paper has no classification row yet
    pub async fn fetch_unclassified(&self) -> Result<Vec<Prompt>> {
        PromptEntity::find()
            .from_raw_sql(Statement::from_string(self.backend(), UNCLASSIFIED_SQL))
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Append classification rows.
    ///
    /// Rows for papers without a prompt are dropped and logged. Returns the
    /// number of rows written.
    pub async fn append_classifications(&self, records: &[ClassificationRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i32> = records.iter().map(|r| r.paper_id).collect();
        let with_prompt: HashSet<i32> = PromptEntity::find()
            .filter(PromptColumn::PaperId.is_in(ids))
            .all(self.conn())
            .await?
            .into_iter()
            .map(|p| p.paper_id)
            .collect();

        let now = chrono::Utc::now();
        let rows: Vec<ClassificationActiveModel> = records
            .iter()
            .filter(|r| {
                let keep = with_prompt.contains(&r.paper_id);
                if !keep {
                    warn!(paper_id = r.paper_id, category = %r.category, "No prompt for paper, dropping classification");
                }
                keep
            })
            .map(|r| ClassificationActiveModel {
                id: NotSet,
                paper_id: Set(r.paper_id),
                category: Set(r.category.clone()),
                confidence: Set(r.confidence),
                created_at: Set(now.into()),
            })
            .collect();

        if rows.is_empty() {
            return Ok(0);
        }

        let written = rows.len();
        ClassificationEntity::insert_many(rows).exec(self.conn()).await?;
        Ok(written)
    }

    /// Classification rows of a paper, highest confidence first
    pub async fn classifications_for(&self, paper_id: i32) -> Result<Vec<Classification>> {
        ClassificationEntity::find()
            .filter(ClassificationColumn::PaperId.eq(paper_id))
            .order_by_desc(ClassificationColumn::Confidence)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Number of classification rows per category
    pub async fn category_counts(&self) -> Result<Vec<(String, i64)>> {
        ClassificationEntity::find()
            .select_only()
            .column(ClassificationColumn::Category)
            .column_as(Expr::col(ClassificationColumn::Id).count(), "papers")
            .group_by(ClassificationColumn::Category)
            .order_by_asc(ClassificationColumn::Category)
            .into_tuple::<(String, i64)>()
            .all(self.conn())
            .await
            .map_err(Into::into)
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn dependent_failure(table: &'static str, row: String, err: DbErr) -> DependentFailure {
    DependentFailure {
        table,
        row,
        error: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::records::{AuthorRecord, TermType};

    async fn repo() -> Repository {
        let repo = Repository::new(DbPool::in_memory().await.unwrap());
        repo.initialize(InitMode::CreateIfMissing).await.unwrap();
        repo
    }

    fn paper(external_id: &str) -> NormalizedPaper {
        NormalizedPaper {
            external_id: external_id.to_string(),
            insert_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 15),
            publication_year: Some(2024),
            download_count: 12,
            citing_patent_count: 1,
            title: format!("Paper {}", external_id),
            abstract_text: "An abstract".to_string(),
            authors: vec![
                AuthorRecord {
                    external_id: Some("a1".into()),
                    full_name: "Ada Lovelace".into(),
                    affiliation: Some("Analytical Engines".into()),
                },
                AuthorRecord {
                    external_id: None,
                    full_name: "Charles Babbage".into(),
                    affiliation: None,
                },
            ],
            author_terms: vec!["x".into()],
            subject_terms: vec!["y".into()],
            dynamic_terms: vec!["z".into()],
            prompt: format!("title: Paper {} - abstract: An abstract - index_terms: x, y, z", external_id),
        }
    }

    #[tokio::test]
    async fn test_initialize_creates_all_tables() {
        let repo = repo().await;
        let tables = repo.existing_tables().await.unwrap();
        assert_eq!(tables, TABLES.iter().map(|t| t.to_string()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let repo = repo().await;
        repo.insert_full_paper(&paper("1")).await.unwrap();
        repo.initialize(InitMode::CreateIfMissing).await.unwrap();
        assert_eq!(repo.count_papers().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fresh_initialize_on_blank_store() {
        let repo = Repository::new(DbPool::in_memory().await.unwrap());
        repo.initialize(InitMode::Fresh).await.unwrap();
        assert_eq!(repo.existing_tables().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_fresh_initialize_on_live_store_fails() {
        let repo = repo().await;
        let err = repo.initialize(InitMode::Fresh).await.unwrap_err();
        assert!(matches!(err, AppError::StoreAlreadyExists { ref tables } if tables.len() == 5));
    }

    #[tokio::test]
    async fn test_insert_full_paper_writes_dependents() {
        let repo = repo().await;
        let outcome = repo.insert_full_paper(&paper("100")).await.unwrap();
        let paper_id = outcome.paper_id().unwrap();
        assert!(matches!(outcome, InsertOutcome::Inserted { .. }));

        let stored = repo.find_paper(paper_id).await.unwrap();
        assert_eq!(stored.external_id, "100");
        assert_eq!(stored.insert_date, chrono::NaiveDate::from_ymd_opt(2024, 1, 15));

        let authors = repo.authors_for(paper_id).await.unwrap();
        assert_eq!(authors.len(), 2);
        assert_eq!(authors[0].full_name, "Ada Lovelace");
        assert_eq!(authors[1].author_order, 2);

        let terms = repo.index_terms_for(paper_id).await.unwrap();
        let types: Vec<_> = terms.iter().map(|t| t.term_type().unwrap()).collect();
        assert_eq!(types, vec![TermType::Author, TermType::Subject, TermType::Dynamic]);

        let prompt = repo.prompt_for(paper_id).await.unwrap().unwrap();
        assert!(prompt.prompt_text.ends_with("index_terms: x, y, z"));
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_on_external_id() {
        let repo = repo().await;
        let first = repo.insert_full_paper(&paper("7")).await.unwrap();
        let second = repo.insert_full_paper(&paper("7")).await.unwrap();

        assert!(matches!(first, InsertOutcome::Inserted { .. }));
        assert_eq!(second, InsertOutcome::Duplicate);
        assert!(repo.paper_exists("7").await.unwrap());
        assert_eq!(repo.count_papers().await.unwrap(), 1);

        let paper_id = first.paper_id().unwrap();
        assert_eq!(repo.authors_for(paper_id).await.unwrap().len(), 2);
        assert_eq!(repo.index_terms_for(paper_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dependent_failure_keeps_paper_and_siblings() {
        let repo = repo().await;
        repo.pool
            .conn()
            .execute_unprepared(
                "CREATE TRIGGER reject_author BEFORE INSERT ON authors \
                 WHEN NEW.full_name = 'Faulty Author' \
                 BEGIN SELECT RAISE(ABORT, 'author rejected'); END;",
            )
            .await
            .unwrap();

        let mut batch: Vec<_> = (1..=5).map(|i| paper(&i.to_string())).collect();
        batch[2].authors[1].full_name = "Faulty Author".into();

        let report = repo.insert_papers(&batch).await;
        assert_eq!(report.len(), 5);
        assert_eq!(report.inserted(), 4);
        assert_eq!(report.partial(), 1);
        assert_eq!(report.failed().count(), 0);

        let third = &report.rows[2];
        assert_eq!(third.external_id, "3");
        match third.outcome.as_ref().unwrap() {
            InsertOutcome::Partial { paper_id, failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].table, "authors");
                assert_eq!(repo.authors_for(*paper_id).await.unwrap().len(), 1);
                assert!(repo.prompt_for(*paper_id).await.unwrap().is_some());
            }
            other => panic!("expected partial insert, got {:?}", other),
        }

        assert_eq!(repo.count_papers().await.unwrap(), 5);
        for id in ["1", "2", "4", "5"] {
            let stored = repo.find_paper_by_external_id(id).await.unwrap().unwrap();
            assert_eq!(repo.authors_for(stored.paper_id).await.unwrap().len(), 2);
            assert_eq!(repo.index_terms_for(stored.paper_id).await.unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_fetch_unclassified_is_anti_join() {
        let repo = repo().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let outcome = repo.insert_full_paper(&paper(&format!("p{}", i))).await.unwrap();
            ids.push(outcome.paper_id().unwrap());
        }

        let records: Vec<_> = ids[..2]
            .iter()
            .map(|id| ClassificationRecord {
                paper_id: *id,
                category: "robotics".into(),
                confidence: 0.9,
            })
            .collect();
        assert_eq!(repo.append_classifications(&records).await.unwrap(), 2);

        let unclassified = repo.fetch_unclassified().await.unwrap();
        assert_eq!(unclassified.len(), 3);
        assert_eq!(unclassified.iter().map(|p| p.paper_id).collect::<Vec<_>>(), ids[2..].to_vec());
    }

    #[tokio::test]
    async fn test_multi_label_appends_are_kept() {
        let repo = repo().await;
        let paper_id = repo.insert_full_paper(&paper("ml")).await.unwrap().paper_id().unwrap();

        let records = vec![
            ClassificationRecord { paper_id, category: "robotics".into(), confidence: 0.4 },
            ClassificationRecord { paper_id, category: "machine learning".into(), confidence: 0.8 },
        ];
        assert_eq!(repo.append_classifications(&records).await.unwrap(), 2);

        let stored = repo.classifications_for(paper_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].category, "machine learning");

        let counts = repo.category_counts().await.unwrap();
        assert_eq!(
            counts,
            vec![("machine learning".to_string(), 1), ("robotics".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_classification_requires_prompt() {
        let repo = repo().await;
        let written = repo
            .append_classifications(&[ClassificationRecord {
                paper_id: 999,
                category: "robotics".into(),
                confidence: 0.5,
            }])
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(repo.category_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_empty_is_noop() {
        let repo = repo().await;
        assert_eq!(repo.append_classifications(&[]).await.unwrap(), 0);
    }
}
