//! Conflict-update expressions shared by the upserts.
//!
//! They are written against the `excluded` pseudo table, which Postgres and
//! SQLite both expose inside `ON CONFLICT .. DO UPDATE`.

use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{DbBackend, EntityName, IdenStatic};

/// `COALESCE(excluded.col, <table>.col)`: a null incoming value keeps the
/// stored one.
pub(crate) fn coalesce_excluded<E: EntityName, C: IdenStatic>(entity: E, column: C) -> SimpleExpr {
    let table = entity.table_name();
    let column = column.as_str();
    Expr::cust(format!(
        r#"COALESCE(excluded."{column}", "{table}"."{column}")"#
    ))
}

/// Larger of the stored and incoming value.
pub(crate) fn greatest_excluded<E: EntityName, C: IdenStatic>(
    backend: DbBackend,
    entity: E,
    column: C,
) -> SimpleExpr {
    let function = match backend {
        DbBackend::Sqlite => "MAX",
        _ => "GREATEST",
    };
    let table = entity.table_name();
    let column = column.as_str();
    Expr::cust(format!(
        r#"{function}("{table}"."{column}", excluded."{column}")"#
    ))
}

/// Stored value plus incoming value.
pub(crate) fn accumulate_excluded<E: EntityName, C: IdenStatic>(entity: E, column: C) -> SimpleExpr {
    let table = entity.table_name();
    let column = column.as_str();
    Expr::cust(format!(r#""{table}"."{column}" + excluded."{column}""#))
}
