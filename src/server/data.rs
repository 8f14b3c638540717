//! Read-only corpus routes
//!
//! Plain JSON bodies (no envelope): arrays of entity objects, single entity
//! objects, or `{id, name}` summaries for relationship lookups.

use super::response::{ApiError, ApiResult};
use super::AppState;
use crate::corpus::{CorpusError, EntityKind, EntitySummary};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

fn kind(collection: &str) -> ApiResult<EntityKind> {
    collection
        .parse()
        .map_err(|_| CorpusError::UnknownCollection(collection.to_string()).into())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let kind = kind(&collection)?;
    let entities: Vec<Value> = match query.search.as_deref().map(str::trim) {
        Some(term) if !term.is_empty() => state
            .corpus
            .search_by_name(kind, term)
            .into_iter()
            .map(|e| e.to_json())
            .collect(),
        _ => state.corpus.entities(kind).iter().map(|e| e.to_json()).collect(),
    };
    Ok(Json(entities))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let kind = kind(&collection)?;
    let id = parse_id(&id)?;
    state
        .corpus
        .entity(kind, id)
        .map(|e| Json(e.to_json()))
        .ok_or_else(|| CorpusError::EntityNotFound { kind, id }.into())
}

pub async fn related(
    State(state): State<AppState>,
    Path((collection, id, related)): Path<(String, String, String)>,
) -> ApiResult<Json<Vec<EntitySummary>>> {
    let kind = kind(&collection)?;
    let target = self::kind(&related)?;
    let id = parse_id(&id)?;
    Ok(Json(state.corpus.related(kind, id, target)?))
}

fn parse_id(id: &str) -> ApiResult<i64> {
    id.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid id '{}'", id)))
}
