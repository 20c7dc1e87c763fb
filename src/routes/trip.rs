use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::warn;

use crate::{
    error::AppError,
    models::trip::{StartTripRequest, Trip},
    services::{export, trips},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start-trip", post(start))
        .route("/end-trip/:trip_id", post(end))
        .route("/export/:trip_id", get(export_csv))
        .route("/:trip_id", get(detail))
}

async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartTripRequest>,
) -> Result<Json<Trip>, AppError> {
    let mut tx = state.db.begin().await?;
    let jeep_code = request.jeep_code.clone();
    let trip = trips::start_trip(&mut tx, request)
        .await
        .map_err(|err| log_rejection(err, &format!("start for jeep {jeep_code}")))?;
    tx.commit().await?;
    Ok(Json(trip))
}

async fn end(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<Json<Trip>, AppError> {
    let mut tx = state.db.begin().await?;
    let trip = trips::end_trip(&mut tx, &trip_id)
        .await
        .map_err(|err| log_rejection(err, &format!("end of trip {trip_id}")))?;
    tx.commit().await?;
    Ok(Json(trip))
}

async fn detail(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<Json<Trip>, AppError> {
    let mut conn = state.db.acquire().await?;
    let trip = trips::get_trip(&mut conn, &trip_id).await?;
    Ok(Json(trip))
}

async fn export_csv(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<Response, AppError> {
    // One snapshot for the status check and the log read.
    let mut tx = state.db.begin().await?;
    let export = export::export_trip_csv(&mut tx, &trip_id).await?;
    tx.commit().await?;

    let disposition = format!("attachment; filename={}", export.filename);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.body,
    )
        .into_response())
}

fn log_rejection(err: AppError, what: &str) -> AppError {
    if !err.status_code().is_server_error() {
        warn!("rejected {what}: {err}");
    }
    err
}
