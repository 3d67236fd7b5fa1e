use sqlx::Row;

use cabflow_core::domain::booking::ReferenceId;

use super::{
    decode_err, format_timestamp, parse_timestamp, NotificationLogEntry, NotificationLogRepository,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlNotificationLogRepository {
    pool: DbPool,
}

impl SqlNotificationLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NotificationLogRepository for SqlNotificationLogRepository {
    async fn append(&self, entry: NotificationLogEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO notification_log (reference_id, kind, channel, recipient, delivered,
                attempts, error, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.reference_id.0)
        .bind(&entry.kind)
        .bind(&entry.channel)
        .bind(&entry.recipient)
        .bind(entry.delivered)
        .bind(i64::from(entry.attempts))
        .bind(&entry.error)
        .bind(format_timestamp(entry.sent_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_reference(
        &self,
        id: &ReferenceId,
    ) -> Result<Vec<NotificationLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, reference_id, kind, channel, recipient, delivered, attempts, error, sent_at
             FROM notification_log WHERE reference_id = ? ORDER BY id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let delivered: i64 = row.try_get("delivered").map_err(decode_err)?;
                let attempts: i64 = row.try_get("attempts").map_err(decode_err)?;
                let sent_at: String = row.try_get("sent_at").map_err(decode_err)?;
                Ok(NotificationLogEntry {
                    id: Some(row.try_get("id").map_err(decode_err)?),
                    reference_id: ReferenceId(row.try_get("reference_id").map_err(decode_err)?),
                    kind: row.try_get("kind").map_err(decode_err)?,
                    channel: row.try_get("channel").map_err(decode_err)?,
                    recipient: row.try_get("recipient").map_err(decode_err)?,
                    delivered: delivered != 0,
                    attempts: u32::try_from(attempts).map_err(decode_err)?,
                    error: row.try_get("error").map_err(decode_err)?,
                    sent_at: parse_timestamp("sent_at", &sent_at)?,
                })
            })
            .collect()
    }
}
