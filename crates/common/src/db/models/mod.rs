//! SeaORM entity models
//!
//! Tables of the relational store: papers and their dependents.

mod author;
mod classification;
mod index_term;
mod paper;
mod prompt;

pub use paper::{
    Entity as PaperEntity,
    Model as Paper,
    ActiveModel as PaperActiveModel,
    Column as PaperColumn,
};

pub use author::{
    Entity as AuthorEntity,
    Model as Author,
    ActiveModel as AuthorActiveModel,
    Column as AuthorColumn,
};

pub use index_term::{
    Entity as IndexTermEntity,
    Model as IndexTerm,
    ActiveModel as IndexTermActiveModel,
    Column as IndexTermColumn,
};

pub use prompt::{
    Entity as PromptEntity,
    Model as Prompt,
    ActiveModel as PromptActiveModel,
    Column as PromptColumn,
};

pub use classification::{
    Entity as ClassificationEntity,
    Model as Classification,
    ActiveModel as ClassificationActiveModel,
    Column as ClassificationColumn,
};

/// Every table the store owns, parents first
pub const TABLES: [&str; 5] = ["papers", "authors", "index_terms", "prompts", "classification"];
