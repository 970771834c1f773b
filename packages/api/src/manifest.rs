//! File manifest: logical file name → storage key → metadata.

use chrono::Utc;
use runlog_storage::storage_key_for;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
};

use crate::entity::{run_files, runs};
use crate::sql::coalesce_excluded;

/// Metadata known about a file at registration time. Unknown fields keep
/// whatever an earlier registration recorded.
#[derive(Clone, Debug, Default)]
pub struct FileMeta {
    pub size: Option<i64>,
    pub digest: Option<String>,
    pub content_type: Option<String>,
}

pub async fn upsert_run_file<C: ConnectionTrait>(
    db: &C,
    run: &runs::Model,
    name: &str,
    meta: FileMeta,
) -> Result<(), DbErr> {
    let now = Utc::now().naive_utc();
    let candidate = run_files::ActiveModel {
        run_pk: Set(run.id.clone()),
        name: Set(name.to_string()),
        storage_key: Set(Some(storage_key_for(&run.run_id, name))),
        size: Set(meta.size),
        digest: Set(meta.digest),
        content_type: Set(meta.content_type),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let mut on_conflict = OnConflict::columns([run_files::Column::RunPk, run_files::Column::Name]);
    for column in [
        run_files::Column::StorageKey,
        run_files::Column::Size,
        run_files::Column::Digest,
        run_files::Column::ContentType,
    ] {
        on_conflict.value(column, coalesce_excluded(run_files::Entity, column));
    }
    on_conflict.update_column(run_files::Column::UpdatedAt);

    run_files::Entity::insert(candidate)
        .on_conflict(on_conflict)
        .exec_without_returning(db)
        .await?;

    tracing::debug!(run_id = %run.run_id, file = name, "Registered run file");
    Ok(())
}

pub async fn find_run_file<C: ConnectionTrait>(
    db: &C,
    run_pk: &str,
    name: &str,
) -> Result<Option<run_files::Model>, DbErr> {
    run_files::Entity::find_by_id((run_pk.to_string(), name.to_string()))
        .one(db)
        .await
}

pub async fn list_run_files<C: ConnectionTrait>(
    db: &C,
    run_pk: &str,
) -> Result<Vec<run_files::Model>, DbErr> {
    run_files::Entity::find()
        .filter(run_files::Column::RunPk.eq(run_pk))
        .order_by_desc(run_files::Column::UpdatedAt)
        .order_by_asc(run_files::Column::Name)
        .all(db)
        .await
}
