use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr, EntityTrait};

use crate::entity::filestream_cursors;
use crate::sql::{accumulate_excluded, greatest_excluded};

/// Records that `lines` lines starting at `offset` were delivered for `filename`.
///
/// The stored offset only moves forward, so replaying a chunk is harmless;
/// the line count is a plain running total of deliveries.
pub async fn advance<C: ConnectionTrait>(
    db: &C,
    run_pk: &str,
    filename: &str,
    offset: i64,
    lines: i64,
) -> Result<(), DbErr> {
    let candidate = filestream_cursors::ActiveModel {
        run_pk: Set(run_pk.to_string()),
        filename: Set(filename.to_string()),
        last_offset: Set(offset.saturating_add(lines)),
        line_count: Set(lines),
    };

    let backend = db.get_database_backend();
    let on_conflict = OnConflict::columns([
        filestream_cursors::Column::RunPk,
        filestream_cursors::Column::Filename,
    ])
    .value(
        filestream_cursors::Column::LastOffset,
        greatest_excluded(
            backend,
            filestream_cursors::Entity,
            filestream_cursors::Column::LastOffset,
        ),
    )
    .value(
        filestream_cursors::Column::LineCount,
        accumulate_excluded(filestream_cursors::Entity, filestream_cursors::Column::LineCount),
    )
    .to_owned();

    filestream_cursors::Entity::insert(candidate)
        .on_conflict(on_conflict)
        .exec_without_returning(db)
        .await?;
    Ok(())
}

pub async fn load<C: ConnectionTrait>(
    db: &C,
    run_pk: &str,
    filename: &str,
) -> Result<Option<filestream_cursors::Model>, DbErr> {
    filestream_cursors::Entity::find_by_id((run_pk.to_string(), filename.to_string()))
        .one(db)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RunUpsert, upsert_run};
    use crate::test_support::TestDb;

    #[tokio::test]
    async fn test_offset_never_moves_back() {
        let t = TestDb::new().await;
        let run = upsert_run(&t.db, &RunUpsert::new("acme", "vision", "run-1"))
            .await
            .unwrap()
            .run;

        advance(&t.db, &run.id, "output.log", 0, 10).await.unwrap();
        advance(&t.db, &run.id, "output.log", 10, 5).await.unwrap();
        // Stale redelivery of the first chunk.
        advance(&t.db, &run.id, "output.log", 0, 10).await.unwrap();

        let cursor = load(&t.db, &run.id, "output.log").await.unwrap().unwrap();
        assert_eq!(cursor.last_offset, 15);
        assert_eq!(cursor.line_count, 25);
    }
}
