//! Idempotent table bootstrap.
//!
//! Tables are derived from the entity definitions and created only when they
//! do not exist yet. The composite unique keys used as conflict targets by the
//! registry are created as separate unique indexes.

use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, Schema};

use crate::entity::{
    api_keys, entities, filestream_cursors, graphql_unknown_ops, projects, run_files, run_history,
    runs,
};

pub async fn bootstrap(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, &schema, entities::Entity).await?;
    create_table(db, &schema, projects::Entity).await?;
    create_table(db, &schema, runs::Entity).await?;
    create_table(db, &schema, run_history::Entity).await?;
    create_table(db, &schema, run_files::Entity).await?;
    create_table(db, &schema, filestream_cursors::Entity).await?;
    create_table(db, &schema, api_keys::Entity).await?;
    create_table(db, &schema, graphql_unknown_ops::Entity).await?;

    for index in unique_indexes() {
        db.execute(backend.build(&index)).await?;
    }

    tracing::info!("Database schema is in place");
    Ok(())
}

async fn create_table<E: EntityTrait>(
    db: &DatabaseConnection,
    schema: &Schema,
    entity: E,
) -> Result<(), DbErr> {
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(db.get_database_backend().build(&statement)).await?;
    Ok(())
}

fn unique_indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("projects_entity_id_name_key")
            .table(projects::Entity)
            .col(projects::Column::EntityId)
            .col(projects::Column::Name)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("runs_project_id_run_id_key")
            .table(runs::Entity)
            .col(runs::Column::ProjectId)
            .col(runs::Column::RunId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("runs_run_id_idx")
            .table(runs::Entity)
            .col(runs::Column::RunId)
            .if_not_exists()
            .to_owned(),
    ]
}
