use crate::plate::NormalizedPlate;
use crate::recorder::ClipHandle;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel stored for text attributes the registry has not supplied.
pub const UNKNOWN: &str = "Unknown";

/// Vehicle attributes from the registry.
///
/// Text attributes hold [`UNKNOWN`] until a response supplies them; typed
/// attributes use `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleAttributes {
    pub make: String,
    pub color: String,
    pub fuel_type: String,
    pub mot_status: String,
    pub tax_status: String,
    pub year_of_manufacture: Option<i32>,
    pub tax_due_date: Option<NaiveDate>,
    pub mot_expiry_date: Option<NaiveDate>,
}

impl VehicleAttributes {
    pub fn unknown() -> Self {
        Self {
            make: UNKNOWN.to_string(),
            color: UNKNOWN.to_string(),
            fuel_type: UNKNOWN.to_string(),
            mot_status: UNKNOWN.to_string(),
            tax_status: UNKNOWN.to_string(),
            year_of_manufacture: None,
            tax_due_date: None,
            mot_expiry_date: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }
}

impl Default for VehicleAttributes {
    fn default() -> Self {
        Self::unknown()
    }
}

/// One row per normalized plate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateRecord {
    pub plate_number: NormalizedPlate,
    pub first_capture_time: DateTime<Utc>,
    pub recent_capture_time: DateTime<Utc>,
    pub image_snapshot: Option<Vec<u8>>,
    pub video_reference: Option<ClipHandle>,
    pub vehicle: VehicleAttributes,
}

impl PlateRecord {
    /// Record for a plate seen for the first time
    pub fn first_sighting(
        plate_number: NormalizedPlate,
        capture_time: DateTime<Utc>,
        image_snapshot: Option<Vec<u8>>,
        video_reference: Option<ClipHandle>,
        vehicle: VehicleAttributes,
    ) -> Self {
        Self {
            plate_number,
            first_capture_time: capture_time,
            recent_capture_time: capture_time,
            image_snapshot,
            video_reference,
            vehicle,
        }
    }

    /// Advance the most recent sighting; out-of-order events never move it back.
    pub fn touch(&mut self, capture_time: DateTime<Utc>) {
        if capture_time > self.recent_capture_time {
            self.recent_capture_time = capture_time;
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlateRecordDb {
    pub plate_number: String,
    pub capture_time: DateTime<Utc>,
    pub recent_capture_time: DateTime<Utc>,
    pub image_data: Option<Vec<u8>>,
    pub video_url: Option<String>,
    pub car_make: Option<String>,
    pub car_color: Option<String>,
    pub fuel_type: Option<String>,
    pub mot_status: Option<String>,
    pub tax_status: Option<String>,
    pub year_of_manufacture: Option<i32>,
    pub tax_due_date: Option<NaiveDate>,
    pub mot_expiry_date: Option<NaiveDate>,
}

fn or_unknown(value: Option<String>) -> String {
    value.unwrap_or_else(|| UNKNOWN.to_string())
}

impl From<PlateRecordDb> for PlateRecord {
    fn from(db: PlateRecordDb) -> Self {
        let video_reference = db.video_url.and_then(|url| {
            let handle = ClipHandle::parse(&url);
            if handle.is_none() {
                log::warn!(
                    "[{}] Ignoring malformed video reference {:?}",
                    db.plate_number,
                    url
                );
            }
            handle
        });

        Self {
            plate_number: NormalizedPlate::from_stored(db.plate_number),
            first_capture_time: db.capture_time,
            recent_capture_time: db.recent_capture_time,
            image_snapshot: db.image_data,
            video_reference,
            vehicle: VehicleAttributes {
                make: or_unknown(db.car_make),
                color: or_unknown(db.car_color),
                fuel_type: or_unknown(db.fuel_type),
                mot_status: or_unknown(db.mot_status),
                tax_status: or_unknown(db.tax_status),
                year_of_manufacture: db.year_of_manufacture,
                tax_due_date: db.tax_due_date,
                mot_expiry_date: db.mot_expiry_date,
            },
        }
    }
}

impl From<&PlateRecord> for PlateRecordDb {
    fn from(record: &PlateRecord) -> Self {
        Self {
            plate_number: record.plate_number.as_str().to_string(),
            capture_time: record.first_capture_time,
            recent_capture_time: record.recent_capture_time,
            image_data: record.image_snapshot.clone(),
            video_url: record
                .video_reference
                .as_ref()
                .map(|clip| clip.as_str().to_string()),
            car_make: Some(record.vehicle.make.clone()),
            car_color: Some(record.vehicle.color.clone()),
            fuel_type: Some(record.vehicle.fuel_type.clone()),
            mot_status: Some(record.vehicle.mot_status.clone()),
            tax_status: Some(record.vehicle.tax_status.clone()),
            year_of_manufacture: record.vehicle.year_of_manufacture,
            tax_due_date: record.vehicle.tax_due_date,
            mot_expiry_date: record.vehicle.mot_expiry_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn touch_never_moves_backwards() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let plate = NormalizedPlate::from_stored("AB05CDE".to_string());
        let mut record =
            PlateRecord::first_sighting(plate, t0, None, None, VehicleAttributes::unknown());

        record.touch(t0 - chrono::Duration::hours(1));
        assert_eq!(record.recent_capture_time, t0);

        record.touch(t0 + chrono::Duration::hours(1));
        assert_eq!(record.recent_capture_time, t0 + chrono::Duration::hours(1));
        assert!(record.recent_capture_time >= record.first_capture_time);
    }

    #[test]
    fn null_columns_read_back_as_unknown() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let row = PlateRecordDb {
            plate_number: "AB05CDE".to_string(),
            capture_time: t0,
            recent_capture_time: t0,
            image_data: None,
            video_url: Some("../etc/passwd".to_string()),
            car_make: Some("FORD".to_string()),
            car_color: None,
            fuel_type: None,
            mot_status: None,
            tax_status: None,
            year_of_manufacture: Some(2019),
            tax_due_date: None,
            mot_expiry_date: None,
        };

        let record = PlateRecord::from(row);
        assert_eq!(record.vehicle.make, "FORD");
        assert_eq!(record.vehicle.color, UNKNOWN);
        assert_eq!(record.vehicle.year_of_manufacture, Some(2019));
        assert_eq!(record.video_reference, None);
    }
}
