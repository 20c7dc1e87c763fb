use chrono::SecondsFormat;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::info;

use crate::{
    error::AppError,
    models::{
        gps_log::{GpsLog, GpsQuality},
        trip::TripStatus,
    },
    services::{gps::list_trip_logs, trips::get_trip},
};

/// CSV rendering of a completed trip, ready to be served as a download.
#[derive(Debug, Clone)]
pub struct TripExport {
    pub filename: String,
    pub body: Vec<u8>,
}

// Field order is the column order of the export.
#[derive(Serialize)]
struct CsvRow<'a> {
    log_id: &'a str,
    trip_id: &'a str,
    device_id: &'a str,
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    gps_quality_flag: GpsQuality,
    occupancy_count: i64,
    over_capacity_flag: bool,
    timestamp: String,
}

impl<'a> From<&'a GpsLog> for CsvRow<'a> {
    fn from(log: &'a GpsLog) -> Self {
        Self {
            log_id: &log.log_id,
            trip_id: &log.trip_id,
            device_id: &log.device_id,
            latitude: log.latitude,
            longitude: log.longitude,
            accuracy: log.accuracy,
            gps_quality_flag: log.gps_quality_flag,
            occupancy_count: log.occupancy_count,
            over_capacity_flag: log.over_capacity_flag,
            timestamp: log.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

pub async fn export_trip_csv(
    conn: &mut SqliteConnection,
    trip_id: &str,
) -> Result<TripExport, AppError> {
    let trip = get_trip(conn, trip_id).await?;
    match trip.status {
        TripStatus::Completed => {}
        TripStatus::Active | TripStatus::Cancelled => {
            return Err(AppError::conflict("trip must be COMPLETED before export"));
        }
    }

    let logs = list_trip_logs(conn, trip_id).await?;
    if logs.is_empty() {
        return Err(AppError::not_found("no GPS logs found for this trip"));
    }

    let body = write_csv(&logs)?;
    info!("exported {} logs for trip {trip_id}", logs.len());
    Ok(TripExport {
        filename: format!("{trip_id}_export.csv"),
        body,
    })
}

/// Header row plus one row per log, in the order given.
pub fn write_csv(logs: &[GpsLog]) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for log in logs {
        writer.serialize(CsvRow::from(log))?;
    }
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|err| AppError::Other(anyhow::anyhow!("finish csv export: {}", err.error())))
}
