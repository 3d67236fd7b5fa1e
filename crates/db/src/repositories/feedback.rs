use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use cabflow_core::domain::booking::ReferenceId;
use cabflow_core::domain::feedback::TripFeedback;

use super::{
    decode_err, format_timestamp, parse_decimal, parse_timestamp, FeedbackRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlFeedbackRepository {
    pool: DbPool,
}

impl SqlFeedbackRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_feedback(row: &SqliteRow) -> Result<TripFeedback, RepositoryError> {
    let rating: i64 = row.try_get("rating").map_err(decode_err)?;
    let driver_on_time: Option<i64> = row.try_get("driver_on_time").map_err(decode_err)?;
    let vehicle_clean: Option<i64> = row.try_get("vehicle_clean").map_err(decode_err)?;
    let actual_fare: Option<String> = row.try_get("actual_fare").map_err(decode_err)?;
    let submitted_at: String = row.try_get("submitted_at").map_err(decode_err)?;

    Ok(TripFeedback {
        reference_id: ReferenceId(row.try_get("reference_id").map_err(decode_err)?),
        rating: u8::try_from(rating).map_err(decode_err)?,
        comments: row.try_get("comments").map_err(decode_err)?,
        driver_on_time: driver_on_time.map(|flag| flag != 0),
        vehicle_clean: vehicle_clean.map(|flag| flag != 0),
        actual_fare: actual_fare.map(|fare| parse_decimal("actual_fare", &fare)).transpose()?,
        submitted_by: row.try_get("submitted_by").map_err(decode_err)?,
        submitted_at: parse_timestamp("submitted_at", &submitted_at)?,
    })
}

#[async_trait::async_trait]
impl FeedbackRepository for SqlFeedbackRepository {
    async fn find(&self, id: &ReferenceId) -> Result<Option<TripFeedback>, RepositoryError> {
        let row = sqlx::query(
            "SELECT reference_id, rating, comments, driver_on_time, vehicle_clean, actual_fare,
                    submitted_by, submitted_at
             FROM trip_feedback WHERE reference_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_feedback).transpose()
    }

    async fn insert(&self, feedback: TripFeedback) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO trip_feedback (reference_id, rating, comments, driver_on_time,
                vehicle_clean, actual_fare, submitted_by, submitted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(reference_id) DO NOTHING",
        )
        .bind(&feedback.reference_id.0)
        .bind(i64::from(feedback.rating))
        .bind(&feedback.comments)
        .bind(feedback.driver_on_time)
        .bind(feedback.vehicle_clean)
        .bind(feedback.actual_fare.map(|fare| fare.to_string()))
        .bind(&feedback.submitted_by)
        .bind(format_timestamp(feedback.submitted_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "feedback already recorded for {}",
                feedback.reference_id
            )));
        }
        Ok(())
    }
}
