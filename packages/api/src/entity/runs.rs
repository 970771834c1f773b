//! Tracked runs.
//!
//! `run_id` is the client visible name and is unique within a project only.
//! `storage_id` is minted once on first insert and handed back to clients as
//! the opaque run reference.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "finished")]
    Finished,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "crashed")]
    Crashed,
}

impl RunState {
    /// State reached when a client reports completion with `exit_code`.
    pub fn from_exit_code(exit_code: Option<i64>) -> Self {
        match exit_code {
            None | Some(0) => RunState::Finished,
            Some(_) => RunState::Failed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    #[sea_orm(column_type = "Text")]
    pub run_id: String,
    #[sea_orm(column_type = "Text", unique)]
    pub storage_id: String,
    #[sea_orm(column_type = "Text")]
    pub entity_id: String,
    #[sea_orm(column_type = "Text")]
    pub project_id: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub display_name: Option<String>,
    pub state: RunState,
    pub started_at: DateTime,
    #[sea_orm(nullable)]
    pub finished_at: Option<DateTime>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub summary: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub config: Option<Json>,
    #[sea_orm(column_type = "Text", nullable)]
    pub host: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub program: Option<String>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub tags: Option<Json>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub git_remote: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub git_commit: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::projects::Entity",
        from = "Column::ProjectId",
        to = "super::projects::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Projects,
    #[sea_orm(
        belongs_to = "super::entities::Entity",
        from = "Column::EntityId",
        to = "super::entities::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Entities,
    #[sea_orm(has_many = "super::run_history::Entity")]
    RunHistory,
    #[sea_orm(has_many = "super::run_files::Entity")]
    RunFiles,
    #[sea_orm(has_many = "super::filestream_cursors::Entity")]
    FilestreamCursors,
}

impl Related<super::projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Projects.def()
    }
}

impl Related<super::entities::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Entities.def()
    }
}

impl Related<super::run_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RunHistory.def()
    }
}

impl Related<super::run_files::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RunFiles.def()
    }
}

impl Related<super::filestream_cursors::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FilestreamCursors.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
