use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::{get, post},
    Router,
};
use std::{sync::Arc, time::Instant};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::{
    engine::SentimentEngine,
    error::AppError,
    types::{HealthResponse, PredictRequest, Prediction},
};

pub type AppState = Arc<SentimentEngine>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn health(State(engine): State<AppState>) -> Json<HealthResponse> {
    Json(engine.health())
}

pub async fn predict(
    State(engine): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<Prediction>, AppError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected predict request: {}", rejection.body_text());
        AppError::InvalidRequest(rejection.body_text())
    })?;

    let start = Instant::now();
    let prediction = engine.predict(&request.text);
    debug!(
        "Predict request completed in {:.3}ms ({} chars)",
        start.elapsed().as_secs_f64() * 1000.0,
        request.text.len()
    );

    Ok(Json(prediction))
}
