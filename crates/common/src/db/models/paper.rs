//! Paper entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "papers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub paper_id: i32,

    /// Identifier assigned by the search API; natural key
    #[sea_orm(column_type = "Text", unique)]
    pub external_id: String,

    /// Date the upstream index recorded the paper
    pub insert_date: Option<Date>,

    pub publication_year: Option<i32>,

    pub download_count: i64,

    pub citing_patent_count: i64,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub abstract_text: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::author::Entity")]
    Authors,

    #[sea_orm(has_many = "super::index_term::Entity")]
    IndexTerms,

    #[sea_orm(has_one = "super::prompt::Entity")]
    Prompt,

    #[sea_orm(has_many = "super::classification::Entity")]
    Classifications,
}

impl Related<super::author::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Authors.def()
    }
}

impl Related<super::index_term::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IndexTerms.def()
    }
}

impl Related<super::prompt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Prompt.def()
    }
}

impl Related<super::classification::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Classifications.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
