use sea_orm::entity::prelude::*;

/// Ingestion progress per run and file. Never serialized to clients.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "filestream_cursors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub run_pk: String,
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub filename: String,
    pub last_offset: i64,
    pub line_count: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::runs::Entity",
        from = "Column::RunPk",
        to = "super::runs::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Runs,
}

impl Related<super::runs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Runs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
