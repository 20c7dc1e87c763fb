use axum::{extract::State, routing::post, Json, Router};
use tracing::warn;

use crate::{
    error::AppError,
    models::gps_log::{GpsLog, GpsLogCreate},
    services::gps,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/log", post(create_log))
        .route("/log/", post(create_log))
}

async fn create_log(
    State(state): State<AppState>,
    Json(request): Json<GpsLogCreate>,
) -> Result<Json<GpsLog>, AppError> {
    let trip_id = request.trip_id.clone();
    let mut tx = state.db.begin().await?;
    let log = match gps::ingest(&mut tx, request).await {
        Ok(log) => log,
        Err(err) => {
            if !err.status_code().is_server_error() {
                warn!("rejected log for trip {trip_id}: {err}");
            }
            return Err(err);
        }
    };
    tx.commit().await?;
    Ok(Json(log))
}
