use super::response::{ApiError, ApiResponse, ApiResult};
use super::AppState;
use crate::retrieval::SearchError;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

pub async fn status(State(state): State<AppState>) -> ApiResult<ApiResponse> {
    let table_name = state.index.table_name();
    let info = state.index.store().table_info(table_name)?;
    let stale = info
        .as_ref()
        .and_then(|t| t.corpus_hash.as_deref())
        .map(|hash| hash != state.corpus.fingerprint());

    Ok(ApiResponse::success_with_data(json!({
        "table": table_name,
        "populated": info.as_ref().is_some_and(|t| t.record_count > 0),
        "index": info,
        "stale": stale,
        "loaded": state.index.is_loaded().await,
        "ingesting": state.pipeline.is_running(),
        "llm": state.answerer.has_llm(),
        "corpus": {
            "entities": state.corpus.entity_count(),
            "fingerprint": state.corpus.fingerprint(),
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<usize>,
}

pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<ApiResponse> {
    let limit = request
        .limit
        .unwrap_or_else(|| state.searcher.default_limit());

    match state.searcher.search(&request.query, limit).await {
        Ok(results) => Ok(ApiResponse::success_with_data(json!({
            "query": request.query,
            "attribute_query": state.searcher.patterns().is_attribute_query(&request.query),
            "results": results,
        }))),
        Err(e) => Err(not_ready_or(&state, e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub offline: bool,
}

pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> ApiResult<ApiResponse> {
    match state.answerer.ask(&request.question, request.offline).await {
        Ok(answer) => Ok(ApiResponse::success_with_data(json!(answer))),
        Err(crate::answer::AnswerError::Search(e)) => Err(not_ready_or(&state, e)),
        Err(e) => Err(e.into()),
    }
}

/// Map a search error; a missing index may kick off ingestion
fn not_ready_or(state: &AppState, e: SearchError) -> ApiError {
    let not_ready = matches!(e, SearchError::IndexNotReady(_));
    let error = ApiError::from(e);
    if !(not_ready && state.ingest.auto_ingest) {
        return error;
    }
    match state.start_ingest(None) {
        Ok(session) => error.with_data(json!({"ingest_session": session})),
        Err(_) => error.with_data(json!({"ingesting": true})),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct IngestRequest {
    pub session_id: Option<String>,
}

pub async fn ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, ApiResponse)> {
    // The body is optional
    let request: IngestRequest = if body.iter().all(u8::is_ascii_whitespace) {
        IngestRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))?
    };
    let session = state.start_ingest(request.session_id)?;
    Ok((
        StatusCode::ACCEPTED,
        ApiResponse::success_with_data(json!({
            "session_id": session,
            "progress": format!("/api/progress/{}", session),
        })),
    ))
}

/// Server-sent events for one progress session.
///
/// The stream ends after the terminal event. A session that already finished
/// replays its terminal event; unknown or expired sessions are 404.
pub async fn progress(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let subscription = state
        .progress
        .subscribe(&session)
        .ok_or_else(|| ApiError::not_found(format!("Unknown progress session '{}'", session)))?;

    let events = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let sse = Event::default().event("progress").json_data(&event);
        Some((sse, subscription))
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(state.server.keep_alive_secs.max(1))),
    ))
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingsQuery {
    pub limit: Option<usize>,
}

/// Preview of stored records with the head of each vector
pub async fn embeddings(
    State(state): State<AppState>,
    Query(query): Query<EmbeddingsQuery>,
) -> ApiResult<ApiResponse> {
    let limit = query.limit.unwrap_or(10).min(100);
    let table_name = state.index.table_name();
    let store = state.index.store();

    let Some(info) = store.table_info(table_name)? else {
        return Err(SearchError::IndexNotReady(table_name.to_string()).into());
    };
    let records = store.sample_records(table_name, limit)?;

    let items: Vec<_> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "text": r.text,
                "metadata": r.metadata,
                "vector_preview": r.vector.iter().take(8).collect::<Vec<_>>(),
            })
        })
        .collect();

    Ok(ApiResponse::success_with_data(json!({
        "table": info,
        "records": items,
    })))
}
