pub mod plate_models;

pub use plate_models::{PlateRecord, PlateRecordDb, VehicleAttributes, UNKNOWN};
