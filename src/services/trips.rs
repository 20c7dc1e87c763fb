use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{is_unique_violation, AppError},
    models::trip::{StartTripRequest, Trip, TripStatus},
};

const MAX_ID_ATTEMPTS: usize = 5;

const TRIP_COLUMNS: &str = "trip_id, route_id, direction, recorder_id, jeep_code, \
     official_capacity, starting_occupancy, status, start_time, end_time, created_at";

/// Opens a new ACTIVE trip for a jeep that has none.
///
/// The "no other ACTIVE trip for this jeep" check and the insert run as a
/// single statement, and the partial unique index on `trips(jeep_code)`
/// catches anything that slips past it, so two racing callers end with one
/// trip and one `Conflict`.
pub async fn start_trip(
    conn: &mut SqliteConnection,
    request: StartTripRequest,
) -> Result<Trip, AppError> {
    validate_start(&request)?;

    let now = Utc::now();
    for _ in 0..MAX_ID_ATTEMPTS {
        let trip_id = generate_trip_id(now, &request.jeep_code, &request.direction);
        let inserted = sqlx::query(
            r#"INSERT INTO trips (trip_id, route_id, direction, recorder_id, jeep_code,
                   official_capacity, starting_occupancy, status, start_time, created_at)
               SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9
               WHERE NOT EXISTS (
                   SELECT 1 FROM trips WHERE jeep_code = ?5 AND status = ?8
               )"#,
        )
        .bind(&trip_id)
        .bind(&request.route_id)
        .bind(&request.direction)
        .bind(&request.recorder_id)
        .bind(&request.jeep_code)
        .bind(request.official_capacity)
        .bind(request.starting_occupancy)
        .bind(TripStatus::Active)
        .bind(now)
        .execute(&mut *conn)
        .await;

        match inserted {
            Ok(done) if done.rows_affected() == 0 => {
                return Err(active_trip_conflict(&request.jeep_code));
            }
            Ok(_) => {
                info!(
                    "trip {trip_id} started for jeep {} on route {}",
                    request.jeep_code, request.route_id
                );
                return get_trip(conn, &trip_id).await;
            }
            Err(err) if is_unique_violation(&err, "jeep_code") => {
                return Err(active_trip_conflict(&request.jeep_code));
            }
            Err(err) if is_unique_violation(&err, "trip_id") => {
                warn!("trip id {trip_id} already taken, regenerating");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(AppError::conflict("could not allocate a unique trip id"))
}

/// Moves an ACTIVE trip to COMPLETED and stamps `end_time`.
pub async fn end_trip(conn: &mut SqliteConnection, trip_id: &str) -> Result<Trip, AppError> {
    let trip = get_trip(conn, trip_id).await?;
    match trip.status {
        TripStatus::Active => {}
        TripStatus::Completed | TripStatus::Cancelled => {
            return Err(AppError::conflict("only ACTIVE trips can be ended"));
        }
    }

    mark_completed(conn, trip_id).await?;
    info!("trip {trip_id} completed");
    get_trip(conn, trip_id).await
}

/// Conditional ACTIVE -> COMPLETED update. Fails with `Conflict` when the
/// trip was ended by someone else after it was read.
async fn mark_completed(conn: &mut SqliteConnection, trip_id: &str) -> Result<(), AppError> {
    let updated = sqlx::query(
        "UPDATE trips SET status = ?1, end_time = ?2 WHERE trip_id = ?3 AND status = ?4",
    )
    .bind(TripStatus::Completed)
    .bind(Utc::now())
    .bind(trip_id)
    .bind(TripStatus::Active)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::conflict("only ACTIVE trips can be ended"));
    }
    Ok(())
}

pub async fn get_trip(conn: &mut SqliteConnection, trip_id: &str) -> Result<Trip, AppError> {
    let query = format!("SELECT {TRIP_COLUMNS} FROM trips WHERE trip_id = ?1");
    sqlx::query_as::<_, Trip>(&query)
        .bind(trip_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("trip not found"))
}

fn validate_start(request: &StartTripRequest) -> Result<(), AppError> {
    let required = [
        ("route_id", &request.route_id),
        ("direction", &request.direction),
        ("recorder_id", &request.recorder_id),
        ("jeep_code", &request.jeep_code),
    ];
    // Identifiers are opaque; only the empty string is refused.
    for (field, value) in required {
        if value.is_empty() {
            return Err(AppError::validation(format!("{field} is required")));
        }
    }

    if request.official_capacity <= 0 {
        return Err(AppError::validation("official capacity must be positive"));
    }
    if request.starting_occupancy < 0 {
        return Err(AppError::validation("starting occupancy cannot be negative"));
    }
    if request.starting_occupancy > request.official_capacity {
        return Err(AppError::validation(
            "starting occupancy cannot exceed official capacity",
        ));
    }
    Ok(())
}

/// `{capture date}_{jeep}_{direction}_{4 hex}`, e.g. `2026-10-16_J-042_north_9f3a`.
fn generate_trip_id(now: DateTime<Utc>, jeep_code: &str, direction: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{jeep_code}_{direction}_{}", now.date_naive(), &suffix[..4])
}

fn active_trip_conflict(jeep_code: &str) -> AppError {
    AppError::conflict(format!("jeep {jeep_code} already has an ACTIVE trip"))
}
