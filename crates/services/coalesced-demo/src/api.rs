use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Clone)]
pub struct AppState {
    /// Requests that actually reached the server
    pub hits: Arc<AtomicUsize>,
    pub delay: Duration,
}

#[derive(Serialize)]
pub struct FooResponse {
    foo: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(root)).with_state(state)
}

/// Slow endpoint, answers after the configured delay
async fn root(State(state): State<AppState>) -> Json<FooResponse> {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::info!(hit, "Incoming request, delaying response by {:?}", state.delay);

    tokio::time::sleep(state.delay).await;

    tracing::info!(hit, "Responding");
    Json(FooResponse { foo: "bar" })
}
