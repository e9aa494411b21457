use crate::db::models::{PlateRecord, PlateRecordDb};
use crate::db::store::{PlateStore, PlateTransaction};
use crate::error::Error;
use crate::plate::NormalizedPlate;
use crate::recorder::ClipHandle;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, info};

/// Plates repository backed by the `license_plates` table
#[derive(Clone)]
pub struct PlatesRepository {
    pool: Arc<PgPool>,
}

impl PlatesRepository {
    /// Create a new plates repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlateStore for PlatesRepository {
    async fn begin(&self) -> Result<Box<dyn PlateTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(PgPlateTransaction { tx }))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Database health check failed: {}", e)))?;
        Ok(())
    }

    async fn clear_video_reference(
        &self,
        plate: &NormalizedPlate,
        clip: &ClipHandle,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE license_plates
            SET video_url = NULL, updated_at = NOW()
            WHERE plate_number = $1 AND video_url = $2
            "#,
        )
        .bind(plate.as_str())
        .bind(clip.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to clear video reference: {}", e)))?;

        if result.rows_affected() > 0 {
            info!("Cleared dangling video reference {} for {}", clip, plate);
        }

        Ok(result.rows_affected() > 0)
    }
}

/// An open transaction on the `license_plates` table
pub struct PgPlateTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PlateTransaction for PgPlateTransaction {
    async fn find_for_update(&mut self, plate: &NormalizedPlate) -> Result<Option<PlateRecord>> {
        let result = sqlx::query_as::<_, PlateRecordDb>(
            r#"
            SELECT plate_number, capture_time, recent_capture_time, image_data, video_url,
                   car_make, car_color, fuel_type, mot_status, tax_status,
                   year_of_manufacture, tax_due_date, mot_expiry_date
            FROM license_plates
            WHERE plate_number = $1
            FOR UPDATE
            "#,
        )
        .bind(plate.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to look up plate: {}", e)))?;

        Ok(result.map(PlateRecord::from))
    }

    async fn insert(&mut self, record: &PlateRecord) -> Result<()> {
        let row = PlateRecordDb::from(record);

        sqlx::query(
            r#"
            INSERT INTO license_plates (
                plate_number, capture_time, recent_capture_time, image_data, video_url,
                car_make, car_color, fuel_type, mot_status, tax_status,
                year_of_manufacture, tax_due_date, mot_expiry_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&row.plate_number)
        .bind(row.capture_time)
        .bind(row.recent_capture_time)
        .bind(&row.image_data)
        .bind(&row.video_url)
        .bind(&row.car_make)
        .bind(&row.car_color)
        .bind(&row.fuel_type)
        .bind(&row.mot_status)
        .bind(&row.tax_status)
        .bind(row.year_of_manufacture)
        .bind(row.tax_due_date)
        .bind(row.mot_expiry_date)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to insert plate: {}", e)))?;

        debug!("Inserted row for {}", row.plate_number);
        Ok(())
    }

    async fn update(&mut self, record: &PlateRecord) -> Result<()> {
        let row = PlateRecordDb::from(record);

        let result = sqlx::query(
            r#"
            UPDATE license_plates
            SET recent_capture_time = $2, image_data = $3, video_url = $4,
                car_make = $5, car_color = $6, fuel_type = $7, mot_status = $8,
                tax_status = $9, year_of_manufacture = $10, tax_due_date = $11,
                mot_expiry_date = $12, updated_at = NOW()
            WHERE plate_number = $1
            "#,
        )
        .bind(&row.plate_number)
        .bind(row.recent_capture_time)
        .bind(&row.image_data)
        .bind(&row.video_url)
        .bind(&row.car_make)
        .bind(&row.car_color)
        .bind(&row.fuel_type)
        .bind(&row.mot_status)
        .bind(&row.tax_status)
        .bind(row.year_of_manufacture)
        .bind(row.tax_due_date)
        .bind(row.mot_expiry_date)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to update plate: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "Plate {} vanished during update",
                row.plate_number
            ))
            .into());
        }

        debug!("Updated row for {}", row.plate_number);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgPlateTransaction { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PgPlateTransaction { tx } = *self;
        tx.rollback()
            .await
            .map_err(|e| Error::Database(format!("Failed to roll back transaction: {}", e)))?;
        Ok(())
    }
}
