//! Step indexed metric history.

use chrono::{DateTime, NaiveDateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QuerySelect, TransactionTrait,
};
use serde_json::{Map, Value};

use crate::entity::run_history;

pub const STEP_FIELD: &str = "_step";
pub const TIMESTAMP_FIELD: &str = "_timestamp";

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryPoint {
    pub step: i64,
    pub ts: NaiveDateTime,
    pub data: Map<String, Value>,
}

fn as_integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// Parses one history line.
///
/// Blank lines, invalid JSON and non-object values yield `None`. Without a
/// numeric `_step` the point lands on `previous_step + 1`; without a numeric
/// `_timestamp` (seconds since epoch) it is stamped with `now`.
pub fn parse_line(line: &str, previous_step: i64, now: DateTime<Utc>) -> Option<HistoryPoint> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let data = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(data)) => data,
        Ok(_) => {
            tracing::debug!("Skipping non-object history line");
            return None;
        }
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable history line");
            return None;
        }
    };

    let step = data
        .get(STEP_FIELD)
        .and_then(as_integer)
        .unwrap_or(previous_step + 1);

    let ts = data
        .get(TIMESTAMP_FIELD)
        .and_then(Value::as_f64)
        .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0).round() as i64))
        .unwrap_or(now)
        .naive_utc();

    Some(HistoryPoint { step, ts, data })
}

/// Shallow merge: incoming keys overwrite, every other stored key survives.
pub fn merge_documents(existing: Value, incoming: Map<String, Value>) -> Value {
    match existing {
        Value::Object(mut stored) => {
            stored.extend(incoming);
            Value::Object(stored)
        }
        _ => Value::Object(incoming),
    }
}

/// Stores `point`, merging into the document already recorded for its step.
///
/// The first writer inserts; later writers lock the row and merge inside the
/// same transaction, so concurrent deliveries with disjoint keys all survive.
pub async fn upsert_point(
    db: &DatabaseConnection,
    run_pk: &str,
    point: HistoryPoint,
) -> Result<(), DbErr> {
    let txn = db.begin().await?;

    let candidate = run_history::ActiveModel {
        run_pk: Set(run_pk.to_string()),
        step: Set(point.step),
        ts: Set(point.ts),
        data: Set(Value::Object(point.data.clone())),
    };
    let inserted = run_history::Entity::insert(candidate)
        .on_conflict(
            OnConflict::columns([run_history::Column::RunPk, run_history::Column::Step])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&txn)
        .await?;

    if inserted == 0 {
        let existing = run_history::Entity::find_by_id((run_pk.to_string(), point.step))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("history step {}", point.step)))?;

        let merged = merge_documents(existing.data, point.data);
        run_history::Entity::update_many()
            .col_expr(run_history::Column::Data, Expr::value(merged))
            .col_expr(run_history::Column::Ts, Expr::value(point.ts))
            .filter(run_history::Column::RunPk.eq(run_pk))
            .filter(run_history::Column::Step.eq(point.step))
            .exec(&txn)
            .await?;
    }

    txn.commit().await
}
