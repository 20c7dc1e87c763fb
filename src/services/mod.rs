pub mod export;
pub mod gps;
pub mod trips;
