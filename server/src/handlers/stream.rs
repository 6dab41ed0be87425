use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
};
use futures::TryStreamExt;
use request::RelayRequest;
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;
use crate::error::AppError;

/// Streams the generated text of one chat completion back as `text/plain`.
pub async fn stream_completion(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    info!(
        "Received relay request for model: {}",
        payload.model().unwrap_or("<unset>")
    );

    let stream = state
        .relay
        .open(payload)
        .await?
        .inspect_err(|e| error!("Relay stream aborted: {}", e));

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    ))
}
