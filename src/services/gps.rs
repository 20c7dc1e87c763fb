use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{is_unique_violation, AppError},
    models::{
        gps_log::{GpsLog, GpsLogCreate, GpsQuality},
        trip::TripStatus,
    },
    services::trips::get_trip,
};

pub const MIN_DEVICE_ID_LEN: usize = 3;

const MAX_ID_ATTEMPTS: usize = 5;

/// Validates one sample against its trip and stores it with the derived
/// quality and overcapacity flags.
///
/// Checks run in a fixed order and the first failure wins: device id, trip
/// existence, trip ACTIVE, accuracy, occupancy. Coordinates are stored as
/// received.
pub async fn ingest(conn: &mut SqliteConnection, log: GpsLogCreate) -> Result<GpsLog, AppError> {
    let sample = check_log(conn, log).await?;
    store_log(conn, sample).await
}

/// Runs the ordered checks and builds the sample with its derived fields.
async fn check_log(conn: &mut SqliteConnection, log: GpsLogCreate) -> Result<GpsLog, AppError> {
    if log.device_id.trim().chars().count() < MIN_DEVICE_ID_LEN {
        return Err(AppError::validation("invalid device id"));
    }

    let trip = get_trip(conn, &log.trip_id).await?;
    match trip.status {
        TripStatus::Active => {}
        TripStatus::Completed | TripStatus::Cancelled => return Err(inactive_trip()),
    }

    let accuracy = match log.accuracy {
        Some(accuracy) if accuracy > 0.0 => accuracy,
        _ => return Err(AppError::validation("invalid accuracy")),
    };
    if log.occupancy_count < 0 {
        return Err(AppError::validation("negative occupancy"));
    }

    Ok(GpsLog {
        log_id: generate_log_id(&log.trip_id),
        over_capacity_flag: log.occupancy_count > trip.official_capacity,
        gps_quality_flag: GpsQuality::from_accuracy(accuracy),
        timestamp: log.captured_at.unwrap_or_else(Utc::now),
        trip_id: log.trip_id,
        device_id: log.device_id,
        latitude: log.latitude,
        longitude: log.longitude,
        accuracy,
        occupancy_count: log.occupancy_count,
    })
}

/// Inserts a checked sample, only while its trip is still ACTIVE. The trip
/// may have been ended since `check_log` read it; that surfaces as
/// `Conflict` with nothing stored.
async fn store_log(conn: &mut SqliteConnection, mut sample: GpsLog) -> Result<GpsLog, AppError> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let inserted = sqlx::query(
            r#"INSERT INTO gps_logs (log_id, trip_id, device_id, latitude, longitude, accuracy,
                   occupancy_count, over_capacity_flag, gps_quality_flag, timestamp)
               SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
               WHERE EXISTS (SELECT 1 FROM trips WHERE trip_id = ?2 AND status = ?11)"#,
        )
        .bind(&sample.log_id)
        .bind(&sample.trip_id)
        .bind(&sample.device_id)
        .bind(sample.latitude)
        .bind(sample.longitude)
        .bind(sample.accuracy)
        .bind(sample.occupancy_count)
        .bind(sample.over_capacity_flag)
        .bind(sample.gps_quality_flag)
        .bind(sample.timestamp)
        .bind(TripStatus::Active)
        .execute(&mut *conn)
        .await;

        match inserted {
            Ok(done) if done.rows_affected() == 0 => return Err(inactive_trip()),
            Ok(_) => {
                debug!(
                    "log {} stored for trip {} (quality {}, over capacity {})",
                    sample.log_id,
                    sample.trip_id,
                    sample.gps_quality_flag,
                    sample.over_capacity_flag
                );
                return Ok(sample);
            }
            Err(err) if is_unique_violation(&err, "log_id") => {
                warn!("log id {} already taken, regenerating", sample.log_id);
                sample.log_id = generate_log_id(&sample.trip_id);
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(AppError::conflict("could not allocate a unique log id"))
}

/// All samples of a trip, oldest capture first; equal timestamps keep
/// insertion order.
pub async fn list_trip_logs(
    conn: &mut SqliteConnection,
    trip_id: &str,
) -> Result<Vec<GpsLog>, AppError> {
    let logs = sqlx::query_as::<_, GpsLog>(
        r#"SELECT log_id, trip_id, device_id, latitude, longitude, accuracy,
                  occupancy_count, over_capacity_flag, gps_quality_flag, timestamp
           FROM gps_logs
           WHERE trip_id = ?1
           ORDER BY timestamp ASC, id ASC"#,
    )
    .bind(trip_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(logs)
}

fn generate_log_id(trip_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{trip_id}_{}", &suffix[..6])
}

fn inactive_trip() -> AppError {
    AppError::conflict("trip is not active")
}
