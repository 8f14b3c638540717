//! HTTP API integration, driven through the router without a socket

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use holocron::app::App;
use holocron::config::Config;
use holocron::corpus::Corpus;
use holocron::embedding::HashingProvider;
use holocron::server::{self, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn corpus_json() -> Value {
    json!({
        "characters": [
            {"id": 1, "name": "Luke Skywalker", "eye_color": "blue", "homeworld": 1},
            {"id": 4, "name": "Darth Vader", "eye_color": "yellow", "homeworld": 1},
            {"id": 5, "name": "Leia Organa", "eye_color": "brown", "homeworld": 2}
        ],
        "films": [{"id": 1, "title": "A New Hope", "episode_id": 4}],
        "planets": [
            {"id": 1, "name": "Tatooine"},
            {"id": 2, "name": "Alderaan"}
        ],
        "films_characters": [
            {"film_id": 1, "character_id": 1},
            {"film_id": 1, "character_id": 4}
        ]
    })
}

fn state(temp: &TempDir) -> AppState {
    state_with(temp, |_| {})
}

fn state_with(temp: &TempDir, configure: impl FnOnce(&mut Config)) -> AppState {
    let corpus_path = temp.path().join("database.json");
    std::fs::write(&corpus_path, corpus_json().to_string()).unwrap();

    let mut config = Config::default();
    config.storage.data_dir = temp.path().join("data");
    config.storage.corpus_path = corpus_path;
    config.embedding.provider = "hashing".to_string();
    config.embedding.request_delay_ms = 0;
    config.ingest.retry_backoff_ms = 0;
    configure(&mut config);

    let app = App::with_provider(config, Arc::new(HashingProvider::new(128).unwrap())).unwrap();
    let corpus = Corpus::from_value(corpus_json()).unwrap();
    AppState::new(&app, corpus).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

/// Follow a progress session over SSE until the server ends the stream
async fn progress_events(router: &Router, session: &str) -> (StatusCode, Vec<Value>) {
    let request = Request::get(format!("/api/progress/{}", session))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    if status != StatusCode::OK {
        return (status, Vec::new());
    }
    let bytes = tokio::time::timeout(
        Duration::from_secs(30),
        axum::body::to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("progress stream did not end")
    .unwrap();

    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let events = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim_start()).unwrap())
        .collect();
    (status, events)
}

/// Start ingestion through the API and wait for its terminal event
async fn ingest(router: &Router, session: &str) {
    let (status, body) = post(router, "/api/ingest", json!({"session_id": session})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["session_id"], session);

    let (status, events) = progress_events(router, session).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events.last().unwrap()["type"], "complete");
}

#[tokio::test]
async fn test_health() {
    let temp = TempDir::new().unwrap();
    let router = server::router(state(&temp));

    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_search_before_ingest_is_unavailable() {
    let temp = TempDir::new().unwrap();
    let router = server::router(state(&temp));

    let (status, body) = post(&router, "/api/search", json!({"query": "yellow eyes"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().is_some());
}

#[tokio::test]
async fn test_search_rejects_empty_query() {
    let temp = TempDir::new().unwrap();
    let state = state(&temp);
    let router = server::router(state.clone());
    ingest(&router, "test-run").await;

    let (status, body) = post(&router, "/api/search", json!({"query": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_ingest_then_search() {
    let temp = TempDir::new().unwrap();
    let state = state(&temp);
    let router = server::router(state.clone());
    ingest(&router, "test-run").await;

    let (status, body) = post(
        &router,
        "/api/search",
        json!({"query": "characters with yellow eyes", "limit": 2}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["attribute_query"], true);

    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["id"], "characters_4");
    assert_eq!(results[0]["metadata"]["name"], "Darth Vader");
    assert!(results[0]["relevance"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_ask_offline() {
    let temp = TempDir::new().unwrap();
    let state = state(&temp);
    let router = server::router(state.clone());
    ingest(&router, "test-run").await;

    let (status, body) = post(
        &router,
        "/api/ask",
        json!({"question": "Who has yellow eyes?", "offline": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].get("answer").is_none());
    assert_eq!(body["data"]["context"][0]["id"], "characters_4");
    assert!(body["data"]["entities"]["characters"]
        .as_array()
        .unwrap()
        .contains(&json!(4)));
}

#[tokio::test]
async fn test_status_tracks_index() {
    let temp = TempDir::new().unwrap();
    let state = state(&temp);
    let router = server::router(state.clone());

    let (status, body) = get(&router, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["populated"], false);
    assert_eq!(body["data"]["corpus"]["entities"], 6);

    ingest(&router, "test-run").await;

    let (_, body) = get(&router, "/api/status").await;
    assert_eq!(body["data"]["populated"], true);
    assert_eq!(body["data"]["index"]["record_count"], 6);
}

#[tokio::test]
async fn test_embeddings_preview() {
    let temp = TempDir::new().unwrap();
    let state = state(&temp);
    let router = server::router(state.clone());
    ingest(&router, "test-run").await;

    let (status, body) = get(&router, "/api/embeddings?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let records = body["data"]["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["vector_preview"].as_array().unwrap().len(), 8);
    assert_eq!(body["data"]["table"]["dimension"], 128);
}

#[tokio::test]
async fn test_data_api() {
    let temp = TempDir::new().unwrap();
    let router = server::router(state(&temp));

    let (status, body) = get(&router, "/api/characters").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (_, body) = get(&router, "/api/characters?search=vader").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "Darth Vader");

    let (status, body) = get(&router, "/api/films/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "A New Hope");

    let (_, body) = get(&router, "/api/films/1/characters").await;
    let names: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Luke Skywalker", "Darth Vader"]);

    let (_, body) = get(&router, "/api/characters/5/planets").await;
    assert_eq!(body, json!([{"id": 2, "name": "Alderaan"}]));
}

#[tokio::test]
async fn test_data_api_errors() {
    let temp = TempDir::new().unwrap();
    let router = server::router(state(&temp));

    let (status, _) = get(&router, "/api/droids").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&router, "/api/characters/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&router, "/api/characters/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_progress_stream_follows_run() {
    let temp = TempDir::new().unwrap();
    let router = server::router(state_with(&temp, |config| {
        config.embedding.request_delay_ms = 150;
    }));

    let (status, _) = post(&router, "/api/ingest", json!({"session_id": "live"})).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, events) = progress_events(&router, "live").await;
    assert_eq!(status, StatusCode::OK);
    assert!(events.iter().any(|e| e["type"] == "embedding"));
    assert_eq!(events.last().unwrap()["type"], "complete");
    assert_eq!(events.last().unwrap()["progress"], 100);
    let terminal = events
        .iter()
        .filter(|e| e["type"] == "complete" || e["type"] == "error")
        .count();
    assert_eq!(terminal, 1);
}

#[tokio::test]
async fn test_progress_after_run_replays_terminal_event() {
    let temp = TempDir::new().unwrap();
    let router = server::router(state(&temp));
    ingest(&router, "done").await;

    let (status, events) = progress_events(&router, "done").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "complete");
    assert_eq!(events[0]["data"]["indexed"], 6);
}

#[tokio::test]
async fn test_progress_unknown_session() {
    let temp = TempDir::new().unwrap();
    let state = state(&temp);
    let router = server::router(state.clone());

    for i in 0..50 {
        let (status, _) = progress_events(&router, &format!("junk{}", i)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    assert_eq!(state.progress.session_count(), 0);
}

#[tokio::test]
async fn test_progress_session_expires() {
    let temp = TempDir::new().unwrap();
    let state = state_with(&temp, |config| {
        config.server.progress_retention_secs = 0;
    });
    let router = server::router(state.clone());
    ingest(&router, "short-lived").await;

    tokio::time::timeout(Duration::from_secs(10), async {
        while state.progress.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let (status, _) = progress_events(&router, "short-lived").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_concurrent_ingest_conflicts() {
    let temp = TempDir::new().unwrap();
    let router = server::router(state_with(&temp, |config| {
        config.embedding.request_delay_ms = 150;
    }));

    let (status, _) = post(&router, "/api/ingest", json!({"session_id": "first"})).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = post(&router, "/api/ingest", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let (_, events) = progress_events(&router, "first").await;
    assert_eq!(events.last().unwrap()["type"], "complete");

    // Finished sessions keep their id until they expire
    let (status, _) = post(&router, "/api/ingest", json!({"session_id": "first"})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    ingest(&router, "second").await;
}
