use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Upper bound (inclusive) of the GOOD accuracy tier, in meters.
pub const GOOD_ACCURACY_MAX: f64 = 20.0;
/// Upper bound (inclusive) of the ACCEPTABLE accuracy tier, in meters.
pub const ACCEPTABLE_ACCURACY_MAX: f64 = 50.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GpsQuality {
    Good,
    Acceptable,
    Poor,
}

impl GpsQuality {
    /// Classifies a positive accuracy radius. Tier boundaries belong to the
    /// better tier.
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy <= GOOD_ACCURACY_MAX {
            GpsQuality::Good
        } else if accuracy <= ACCEPTABLE_ACCURACY_MAX {
            GpsQuality::Acceptable
        } else {
            GpsQuality::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GpsQuality::Good => "GOOD",
            GpsQuality::Acceptable => "ACCEPTABLE",
            GpsQuality::Poor => "POOR",
        }
    }
}

impl fmt::Display for GpsQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stored location/occupancy sample. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GpsLog {
    pub log_id: String,
    pub trip_id: String,
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub occupancy_count: i64,
    pub over_capacity_flag: bool,
    pub gps_quality_flag: GpsQuality,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpsLogCreate {
    pub trip_id: String,
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    pub occupancy_count: i64,
    /// Device capture time; ingestion time is used when absent.
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}
