pub mod gps_log;
pub mod trip;
