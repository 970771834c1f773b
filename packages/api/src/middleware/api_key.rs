//! Credential presence gate.
//!
//! Any presented key is accepted: it is hashed, registered (or its
//! `last_used_at` refreshed) and the record id is attached to the request as
//! the [`Caller`]. Requests without a key proceed anonymously.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};

use crate::entity::api_keys;
use crate::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-wandb-api-key";

/// Identity of the client behind a request.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub api_key_id: Option<String>,
}

/// Pulls the raw credential from the dedicated header, a bearer token or the
/// username slot of HTTP Basic auth, in that order.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(direct) = headers.get(API_KEY_HEADER)
        && let Ok(direct) = direct.to_str()
    {
        let direct = direct.trim();
        if !direct.is_empty() {
            return Some(direct.to_string());
        }
    }

    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, value) = header.split_once(' ')?;

    if scheme.eq_ignore_ascii_case("bearer") {
        let token = value.trim();
        return (!token.is_empty()).then(|| token.to_string());
    }

    if scheme.eq_ignore_ascii_case("basic") {
        let decoded = STANDARD.decode(value.trim()).ok()?;
        let decoded = String::from_utf8_lossy(&decoded);
        let key = decoded.split(':').next().unwrap_or_default();
        return (!key.is_empty()).then(|| key.to_string());
    }

    None
}

/// One-way digest used as the identity of a key.
pub fn hash_api_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

pub async fn ensure_api_key<C: ConnectionTrait>(
    db: &C,
    key_hash: &str,
) -> Result<api_keys::Model, DbErr> {
    let now = Utc::now().naive_utc();
    let candidate = api_keys::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        key_hash: Set(key_hash.to_string()),
        name: Set(None),
        created_at: Set(now),
        last_used_at: Set(now),
    };

    api_keys::Entity::insert(candidate)
        .on_conflict(
            OnConflict::column(api_keys::Column::KeyHash)
                .update_column(api_keys::Column::LastUsedAt)
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    api_keys::Entity::find()
        .filter(api_keys::Column::KeyHash.eq(key_hash))
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound("api key".to_string()))
}

/// Resolves the identity behind `headers`, registering a presented key.
pub async fn resolve_caller<C: ConnectionTrait>(
    db: &C,
    headers: &HeaderMap,
) -> Result<Caller, ApiError> {
    let Some(key) = extract_api_key(headers) else {
        return Ok(Caller::default());
    };
    let record = ensure_api_key(db, &hash_api_key(&key)).await?;
    tracing::debug!(api_key_id = %record.id, "Request authenticated by api key");
    Ok(Caller {
        api_key_id: Some(record.id),
    })
}

pub async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response<Body>, ApiError> {
    let mut request = request;
    let caller = resolve_caller(&state.db, request.headers()).await?;
    request.extensions_mut().insert::<Caller>(caller);
    Ok(next.run(request).await)
}
