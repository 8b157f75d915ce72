//! Author entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "authors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub paper_id: i32,

    /// Position in the upstream author list, starting at 1
    pub author_order: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub external_author_id: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub full_name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub affiliation: Option<String>,
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
