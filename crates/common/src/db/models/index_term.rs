//! Index term entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "index_terms")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub paper_id: i32,

    /// One of author, subject, dynamic
    #[sea_orm(column_type = "Text")]
    pub term_type: String,

    #[sea_orm(column_type = "Text")]
    pub term: String,
}

impl Model {
    pub fn term_type(&self) -> Option<crate::db::TermType> {
        self.term_type.parse().ok()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::paper::Entity",
        from = "Column::PaperId",
        to = "super::paper::Column::PaperId",
        on_delete = "Cascade"
    )]
    Paper,
}

impl Related<super::paper::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Paper.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
