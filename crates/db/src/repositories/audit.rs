use std::collections::BTreeMap;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use cabflow_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use cabflow_core::domain::booking::ReferenceId;

use super::{decode_err, format_timestamp, parse_timestamp, AuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_category(raw: &str) -> Result<AuditCategory, RepositoryError> {
    let category = match raw {
        "ingress" => AuditCategory::Ingress,
        "flow" => AuditCategory::Flow,
        "routing" => AuditCategory::Routing,
        "budget" => AuditCategory::Budget,
        "notification" => AuditCategory::Notification,
        "admin" => AuditCategory::Admin,
        "system" => AuditCategory::System,
        other => return Err(RepositoryError::Decode(format!("unknown audit category `{other}`"))),
    };
    Ok(category)
}

fn parse_outcome(raw: &str) -> Result<AuditOutcome, RepositoryError> {
    match raw {
        "success" => Ok(AuditOutcome::Success),
        "rejected" => Ok(AuditOutcome::Rejected),
        "failed" => Ok(AuditOutcome::Failed),
        other => Err(RepositoryError::Decode(format!("unknown audit outcome `{other}`"))),
    }
}

fn row_to_event(row: &SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let category: String = row.try_get("category").map_err(decode_err)?;
    let outcome: String = row.try_get("outcome").map_err(decode_err)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(decode_err)?;
    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&metadata_json).map_err(decode_err)?;
    let reference_id: Option<String> = row.try_get("reference_id").map_err(decode_err)?;
    let occurred_at: String = row.try_get("occurred_at").map_err(decode_err)?;

    Ok(AuditEvent {
        event_id: row.try_get("id").map_err(decode_err)?,
        reference_id: reference_id.map(ReferenceId),
        correlation_id: row.try_get("correlation_id").map_err(decode_err)?,
        event_type: row.try_get("event_type").map_err(decode_err)?,
        category: parse_category(&category)?,
        actor: row.try_get("actor").map_err(decode_err)?,
        outcome: parse_outcome(&outcome)?,
        metadata,
        occurred_at: parse_timestamp("occurred_at", &occurred_at)?,
    })
}

#[async_trait::async_trait]
impl AuditRepository for SqlAuditRepository {
    async fn append(&self, event: AuditEvent) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&event.metadata).map_err(decode_err)?;
        sqlx::query(
            "INSERT INTO audit_event (id, reference_id, correlation_id, event_type, category,
                actor, outcome, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.reference_id.as_ref().map(|id| id.0.clone()))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_key())
        .bind(&event.actor)
        .bind(event.outcome.as_key())
        .bind(metadata_json)
        .bind(format_timestamp(event.occurred_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_reference(
        &self,
        id: &ReferenceId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, reference_id, correlation_id, event_type, category, actor, outcome,
                    metadata_json, occurred_at
             FROM audit_event WHERE reference_id = ? ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_event).collect()
    }
}

#[cfg(test)]
mod tests {
    use cabflow_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
    use cabflow_core::domain::booking::ReferenceId;

    use super::SqlAuditRepository;
    use crate::repositories::test_support::{at, setup};
    use crate::repositories::AuditRepository;

    #[tokio::test]
    async fn audit_events_round_trip_with_metadata() {
        let repo = SqlAuditRepository::new(setup().await);
        let reference = ReferenceId("TX-261018-AUDIT1".to_owned());
        let mut event = AuditEvent::new(
            Some(reference.clone()),
            "req-1",
            "request.submitted",
            AuditCategory::Ingress,
            "E1001",
            AuditOutcome::Success,
        )
        .with_metadata("route_source", "department_and_location");
        event.occurred_at = at(9);

        repo.append(event.clone()).await.expect("append");
        repo.append(AuditEvent::new(
            None,
            "req-2",
            "system.started",
            AuditCategory::System,
            "system",
            AuditOutcome::Success,
        ))
        .await
        .expect("append unrelated");

        let events = repo.list_for_reference(&reference).await.expect("list");
        assert_eq!(events, vec![event]);
    }
}
