use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::bail_service;
use crate::error::{ServiceError, ServiceResult};
use crate::inference::classifier::Digit;
use crate::inference::preprocess::{format_image, DecodeError};

/// Multipart field holding the image
pub const UPLOAD_FIELD: &str = "file";

#[derive(Serialize, Debug)]
pub struct PredictResponse {
    pub digit: Digit,
}

#[axum_macros::debug_handler]
pub async fn handle_predict_request(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> ServiceResult<(StatusCode, Json<PredictResponse>)> {
    let start = Instant::now();
    let client_ip = client.ip().to_string();

    let file_bytes = read_upload(&mut multipart).await?;

    // Decoding and the forward pass both run off the async workers
    let model = Arc::clone(&state.model);
    let (input_length, prediction) = tokio::task::spawn_blocking(move || {
        let pixels = format_image(&file_bytes)?;
        Ok::<_, DecodeError>((pixels.len(), model.predict(&pixels)))
    })
    .await?
    .map_err(|err| {
        warn!(%client_ip, %err, "Rejected upload");
        ServiceError::new(StatusCode::BAD_REQUEST, err.to_string())
    })?;
    let digit = prediction.map_err(|err| {
        error!(%client_ip, %err, "Inference failed");
        ServiceError::new(StatusCode::INTERNAL_SERVER_ERROR, "Inference failed")
    })?;

    state
        .metrics
        .record_prediction(&client_ip, input_length, start.elapsed());
    info!(%client_ip, %digit, "Predicted digit");

    Ok((StatusCode::OK, Json(PredictResponse { digit })))
}

#[axum_macros::debug_handler]
pub async fn handle_metrics_request(
    State(state): State<AppState>,
) -> ServiceResult<impl IntoResponse> {
    let body = state.metrics.gather()?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}

async fn read_upload(multipart: &mut Multipart) -> ServiceResult<Bytes> {
    let mut file_bytes = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ServiceError::from_multipart)?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            UPLOAD_FIELD => {
                file_bytes = Some(field.bytes().await.map_err(ServiceError::from_multipart)?)
            }
            "" => bail_service!(StatusCode::BAD_REQUEST, "Unnamed field in multipart form"),
            _ => bail_service!(StatusCode::BAD_REQUEST, "Unknown field {}", name),
        }
    }

    match file_bytes {
        Some(bytes) => Ok(bytes),
        None => bail_service!(
            StatusCode::BAD_REQUEST,
            "Missing field {} in multipart form",
            UPLOAD_FIELD
        ),
    }
}
