//! Read side: projects, runs and downsampled history for dashboards.

use chrono::{NaiveDateTime, SecondsFormat};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, FromQueryResult, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::entity::{entities, projects, run_history, runs};
use crate::registry;

/// Upper bound on points returned by one history query.
pub const MAX_POINTS: usize = 2000;
pub const DEFAULT_RUN_LIMIT: u64 = 50;

/// Keeps every `stride`-th row where `stride = ceil(n / max)`. The first row is
/// always kept and the input order is preserved.
pub fn downsample<T>(rows: Vec<T>, max: usize) -> Vec<T> {
    let n = rows.len();
    if max == 0 || n <= max {
        return rows;
    }
    let stride = n.div_ceil(max);
    rows.into_iter()
        .enumerate()
        .filter(|(index, _)| index % stride == 0)
        .map(|(_, row)| row)
        .collect()
}

fn format_ts(ts: NaiveDateTime) -> String {
    ts.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Turns a stored step into a response point. `step` and `ts` always come
/// from the row, even if the document carries keys of the same name.
pub fn project_point(row: run_history::Model, keys: &[String]) -> Value {
    let mut point = Map::new();
    match row.data {
        Value::Object(mut data) if !keys.is_empty() => {
            for key in keys {
                if let Some(value) = data.remove(key) {
                    point.insert(key.clone(), value);
                }
            }
        }
        Value::Object(data) => point.extend(data),
        _ => {}
    }
    point.insert("step".to_string(), Value::from(row.step));
    point.insert("ts".to_string(), Value::String(format_ts(row.ts)));
    Value::Object(point)
}

/// Splits a `a,b,c` key list, ignoring blanks.
pub fn parse_keys(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
    pub keys: Vec<String>,
    pub min_step: Option<i64>,
    pub max_step: Option<i64>,
}

pub async fn history_points<C: ConnectionTrait>(
    db: &C,
    run_pk: &str,
    query: &HistoryQuery,
) -> Result<Vec<Value>, DbErr> {
    let mut select = run_history::Entity::find().filter(run_history::Column::RunPk.eq(run_pk));
    if let Some(min) = query.min_step {
        select = select.filter(run_history::Column::Step.gte(min));
    }
    if let Some(max) = query.max_step {
        select = select.filter(run_history::Column::Step.lte(max));
    }

    let rows = select
        .order_by_asc(run_history::Column::Step)
        .all(db)
        .await?;
    let total = rows.len();

    let points: Vec<Value> = downsample(rows, MAX_POINTS)
        .into_iter()
        .map(|row| project_point(row, &query.keys))
        .collect();

    if points.len() < total {
        tracing::debug!(run_pk, total, returned = points.len(), "Downsampled history");
    }
    Ok(points)
}

#[derive(Clone, Debug, PartialEq, FromQueryResult, Serialize)]
pub struct ProjectSummary {
    pub entity: String,
    pub project: String,
    pub run_count: i64,
    pub last_started: Option<NaiveDateTime>,
}

pub async fn list_projects<C: ConnectionTrait>(db: &C) -> Result<Vec<ProjectSummary>, DbErr> {
    projects::Entity::find()
        .select_only()
        .column_as(entities::Column::Name, "entity")
        .column_as(projects::Column::Name, "project")
        .column_as(Expr::col((runs::Entity, runs::Column::Id)).count(), "run_count")
        .column_as(Expr::col((runs::Entity, runs::Column::StartedAt)).max(), "last_started")
        .inner_join(entities::Entity)
        .left_join(runs::Entity)
        .group_by(entities::Column::Name)
        .group_by(projects::Column::Name)
        .order_by_asc(entities::Column::Name)
        .order_by_asc(projects::Column::Name)
        .into_model::<ProjectSummary>()
        .all(db)
        .await
}

/// Runs of one project, newest first. An unknown project yields no runs.
pub async fn list_runs<C: ConnectionTrait>(
    db: &C,
    entity: &str,
    project: &str,
    limit: u64,
) -> Result<Vec<runs::Model>, DbErr> {
    runs::Entity::find()
        .inner_join(projects::Entity)
        .inner_join(entities::Entity)
        .filter(entities::Column::Name.eq(entity))
        .filter(projects::Column::Name.eq(project))
        .order_by_desc(runs::Column::StartedAt)
        .limit(limit)
        .all(db)
        .await
}

#[derive(Clone, Debug, Serialize)]
pub struct RunView {
    #[serde(flatten)]
    pub run: runs::Model,
    pub entity_name: String,
    pub project_name: String,
}

pub async fn run_view<C: ConnectionTrait>(db: &C, run: runs::Model) -> Result<RunView, DbErr> {
    let (entity_name, project_name) = registry::run_location(db, &run).await?;
    Ok(RunView {
        run,
        entity_name,
        project_name,
    })
}
