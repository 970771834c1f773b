//! Entity → project → run registry.
//!
//! Every create path is an `INSERT .. ON CONFLICT` against a unique key followed
//! by a read of the winning row, so racing creators converge on one record.

use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde_json::Value;
use uuid::Uuid;

use crate::entity::{
    entities, projects,
    runs::{self, RunState},
};
use crate::sql::coalesce_excluded;

/// Optional run metadata columns. A null incoming value keeps the stored one.
const COALESCED_COLUMNS: [runs::Column; 7] = [
    runs::Column::DisplayName,
    runs::Column::Host,
    runs::Column::Program,
    runs::Column::Tags,
    runs::Column::Notes,
    runs::Column::GitRemote,
    runs::Column::GitCommit,
];

#[derive(Clone, Debug, Default)]
pub struct RunUpsert {
    pub entity: String,
    pub project: String,
    pub run_id: String,
    pub display_name: Option<String>,
    pub host: Option<String>,
    pub program: Option<String>,
    pub tags: Option<Value>,
    pub notes: Option<String>,
    pub git_remote: Option<String>,
    pub git_commit: Option<String>,
}

impl RunUpsert {
    pub fn new(
        entity: impl Into<String>,
        project: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            project: project.into(),
            run_id: run_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct UpsertedRun {
    pub run: runs::Model,
    /// `false` when the call refreshed a run that already existed.
    pub inserted: bool,
}

pub async fn ensure_entity<C: ConnectionTrait>(db: &C, name: &str) -> Result<entities::Model, DbErr> {
    let candidate = entities::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        name: Set(name.to_string()),
    };

    entities::Entity::insert(candidate)
        .on_conflict(
            OnConflict::column(entities::Column::Name)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    entities::Entity::find()
        .filter(entities::Column::Name.eq(name))
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("entity {name}")))
}

pub async fn ensure_project<C: ConnectionTrait>(
    db: &C,
    entity_id: &str,
    name: &str,
) -> Result<projects::Model, DbErr> {
    let candidate = projects::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        entity_id: Set(entity_id.to_string()),
        name: Set(name.to_string()),
    };

    projects::Entity::insert(candidate)
        .on_conflict(
            OnConflict::columns([projects::Column::EntityId, projects::Column::Name])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    projects::Entity::find()
        .filter(projects::Column::EntityId.eq(entity_id))
        .filter(projects::Column::Name.eq(name))
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("project {name}")))
}

/// Creates the run or refreshes its metadata.
///
/// The stored state, start time, storage id and documents are never touched
/// on conflict, so a finished run stays finished.
pub async fn upsert_run<C: ConnectionTrait>(db: &C, input: &RunUpsert) -> Result<UpsertedRun, DbErr> {
    let entity = ensure_entity(db, &input.entity).await?;
    let project = ensure_project(db, &entity.id, &input.project).await?;

    let now = Utc::now().naive_utc();
    let storage_id = Uuid::new_v4().to_string();
    let candidate = runs::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        run_id: Set(input.run_id.clone()),
        storage_id: Set(storage_id.clone()),
        entity_id: Set(entity.id.clone()),
        project_id: Set(project.id.clone()),
        display_name: Set(input.display_name.clone()),
        state: Set(RunState::Running),
        started_at: Set(now),
        finished_at: Set(None),
        summary: Set(None),
        config: Set(None),
        host: Set(input.host.clone()),
        program: Set(input.program.clone()),
        tags: Set(input.tags.clone()),
        notes: Set(input.notes.clone()),
        git_remote: Set(input.git_remote.clone()),
        git_commit: Set(input.git_commit.clone()),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let mut on_conflict = OnConflict::columns([runs::Column::ProjectId, runs::Column::RunId]);
    for column in COALESCED_COLUMNS {
        on_conflict.value(column, coalesce_excluded(runs::Entity, column));
    }
    on_conflict.update_column(runs::Column::UpdatedAt);

    runs::Entity::insert(candidate)
        .on_conflict(on_conflict)
        .exec_without_returning(db)
        .await?;

    let run = runs::Entity::find()
        .filter(runs::Column::ProjectId.eq(project.id.as_str()))
        .filter(runs::Column::RunId.eq(input.run_id.as_str()))
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("run {}", input.run_id)))?;

    let inserted = run.storage_id == storage_id;
    tracing::debug!(
        entity = %input.entity,
        project = %input.project,
        run_id = %input.run_id,
        inserted,
        "Upserted run"
    );
    Ok(UpsertedRun { run, inserted })
}

pub async fn find_run_by_project<C: ConnectionTrait>(
    db: &C,
    entity: &str,
    project: &str,
    run_id: &str,
) -> Result<Option<runs::Model>, DbErr> {
    runs::Entity::find()
        .inner_join(projects::Entity)
        .inner_join(entities::Entity)
        .filter(entities::Column::Name.eq(entity))
        .filter(projects::Column::Name.eq(project))
        .filter(runs::Column::RunId.eq(run_id))
        .one(db)
        .await
}

/// Looks a run up by its client visible id alone. Run ids are only unique
/// within a project; the most recently touched run wins.
pub async fn find_run_by_run_id<C: ConnectionTrait>(
    db: &C,
    run_id: &str,
) -> Result<Option<runs::Model>, DbErr> {
    runs::Entity::find()
        .filter(runs::Column::RunId.eq(run_id))
        .order_by_desc(runs::Column::UpdatedAt)
        .limit(1)
        .one(db)
        .await
}

pub async fn find_run_by_storage_id<C: ConnectionTrait>(
    db: &C,
    storage_id: &str,
) -> Result<Option<runs::Model>, DbErr> {
    runs::Entity::find()
        .filter(runs::Column::StorageId.eq(storage_id))
        .one(db)
        .await
}

/// Finds the run or creates it under `entity`/`project`.
pub async fn find_or_create_run<C: ConnectionTrait>(
    db: &C,
    entity: &str,
    project: &str,
    run_id: &str,
) -> Result<runs::Model, DbErr> {
    if let Some(run) = find_run_by_project(db, entity, project, run_id).await? {
        return Ok(run);
    }
    tracing::info!(entity, project, run_id, "Auto-creating run on first reference");
    Ok(upsert_run(db, &RunUpsert::new(entity, project, run_id)).await?.run)
}

/// Replaces the run summary wholesale.
pub async fn replace_summary<C: ConnectionTrait>(db: &C, run_pk: &str, summary: Value) -> Result<(), DbErr> {
    runs::Entity::update_many()
        .col_expr(runs::Column::Summary, Expr::value(summary))
        .col_expr(runs::Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(runs::Column::Id.eq(run_pk))
        .exec(db)
        .await?;
    Ok(())
}

/// Replaces the run config wholesale.
pub async fn replace_config<C: ConnectionTrait>(db: &C, run_pk: &str, config: Value) -> Result<(), DbErr> {
    runs::Entity::update_many()
        .col_expr(runs::Column::Config, Expr::value(config))
        .col_expr(runs::Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
        .filter(runs::Column::Id.eq(run_pk))
        .exec(db)
        .await?;
    Ok(())
}

/// Moves a running run to its terminal state. Returns whether a transition
/// happened; runs that already finished keep their state and finish time.
pub async fn mark_complete<C: ConnectionTrait>(
    db: &C,
    run_pk: &str,
    exit_code: Option<i64>,
) -> Result<bool, DbErr> {
    let state = RunState::from_exit_code(exit_code);
    let now = Utc::now().naive_utc();
    let result = runs::Entity::update_many()
        .col_expr(runs::Column::State, Expr::value(state))
        .col_expr(runs::Column::FinishedAt, Expr::value(now))
        .col_expr(runs::Column::UpdatedAt, Expr::value(now))
        .filter(runs::Column::Id.eq(run_pk))
        .filter(runs::Column::State.eq(RunState::Running))
        .exec(db)
        .await?;

    if result.rows_affected > 0 {
        tracing::info!(run_pk, ?state, ?exit_code, "Run completed");
    }
    Ok(result.rows_affected > 0)
}

/// Names of the entity and project owning `run`.
pub async fn run_location<C: ConnectionTrait>(
    db: &C,
    run: &runs::Model,
) -> Result<(String, String), DbErr> {
    let project = projects::Entity::find_by_id(run.project_id.clone())
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("project {}", run.project_id)))?;
    let entity = entities::Entity::find_by_id(project.entity_id.clone())
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("entity {}", project.entity_id)))?;
    Ok((entity.name, project.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestDb;

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let t = TestDb::new().await;
        let a = ensure_entity(&t.db, "acme").await.unwrap();
        let b = ensure_entity(&t.db, "acme").await.unwrap();
        assert_eq!(a.id, b.id);

        let p1 = ensure_project(&t.db, &a.id, "vision").await.unwrap();
        let p2 = ensure_project(&t.db, &a.id, "vision").await.unwrap();
        assert_eq!(p1.id, p2.id);
    }

    #[tokio::test]
    async fn test_upsert_does_not_clobber_with_nulls() {
        let t = TestDb::new().await;

        let mut first = RunUpsert::new("acme", "vision", "run-1");
        first.host = Some("gpu-01".into());
        let created = upsert_run(&t.db, &first).await.unwrap();
        assert!(created.inserted);

        let mut second = RunUpsert::new("acme", "vision", "run-1");
        second.notes = Some("baseline".into());
        let refreshed = upsert_run(&t.db, &second).await.unwrap();
        assert!(!refreshed.inserted);

        assert_eq!(refreshed.run.id, created.run.id);
        assert_eq!(refreshed.run.storage_id, created.run.storage_id);
        assert_eq!(refreshed.run.host.as_deref(), Some("gpu-01"));
        assert_eq!(refreshed.run.notes.as_deref(), Some("baseline"));
    }

    #[tokio::test]
    async fn test_same_run_id_in_two_projects() {
        let t = TestDb::new().await;
        let a = upsert_run(&t.db, &RunUpsert::new("acme", "a", "run-1")).await.unwrap();
        let b = upsert_run(&t.db, &RunUpsert::new("acme", "b", "run-1")).await.unwrap();
        assert_ne!(a.run.id, b.run.id);

        let found = find_run_by_project(&t.db, "acme", "b", "run-1").await.unwrap().unwrap();
        assert_eq!(found.id, b.run.id);
        assert!(find_run_by_project(&t.db, "acme", "c", "run-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completion_is_terminal() {
        let t = TestDb::new().await;
        let run = upsert_run(&t.db, &RunUpsert::new("acme", "vision", "run-1")).await.unwrap().run;

        assert!(mark_complete(&t.db, &run.id, Some(1)).await.unwrap());
        assert!(!mark_complete(&t.db, &run.id, None).await.unwrap());

        // A later upsert refreshes metadata but keeps the terminal state.
        upsert_run(&t.db, &RunUpsert::new("acme", "vision", "run-1")).await.unwrap();

        let stored = runs::Entity::find_by_id(run.id.clone()).one(&t.db).await.unwrap().unwrap();
        assert_eq!(stored.state, RunState::Failed);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_documents_are_replaced_wholesale() {
        let t = TestDb::new().await;
        let run = upsert_run(&t.db, &RunUpsert::new("acme", "vision", "run-1")).await.unwrap().run;

        replace_summary(&t.db, &run.id, serde_json::json!({"loss": 1.0, "acc": 0.1})).await.unwrap();
        replace_summary(&t.db, &run.id, serde_json::json!({"loss": 0.5})).await.unwrap();

        let stored = runs::Entity::find_by_id(run.id.clone()).one(&t.db).await.unwrap().unwrap();
        assert_eq!(stored.summary, Some(serde_json::json!({"loss": 0.5})));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_upserts_converge() {
        let t = TestDb::new().await;

        let racers: Vec<_> = (0..8)
            .map(|i| {
                let db = t.db.clone();
                tokio::spawn(async move {
                    let mut input = RunUpsert::new("acme", "vision", "same");
                    match i {
                        0 => input.host = Some("gpu-01".into()),
                        1 => input.notes = Some("baseline".into()),
                        _ => {}
                    }
                    upsert_run(&db, &input).await
                })
            })
            .collect();

        let mut results = Vec::new();
        for racer in racers {
            results.push(racer.await.unwrap().unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.inserted).count(), 1);
        let id = &results[0].run.id;
        assert!(results.iter().all(|r| &r.run.id == id));

        let stored = runs::Entity::find_by_id(id.clone()).one(&t.db).await.unwrap().unwrap();
        assert_eq!(stored.host.as_deref(), Some("gpu-01"));
        assert_eq!(stored.notes.as_deref(), Some("baseline"));
    }
}
