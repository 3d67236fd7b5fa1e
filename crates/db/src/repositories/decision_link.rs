use chrono::{DateTime, Utc};
use sqlx::Row;

use cabflow_core::domain::booking::ReferenceId;
use cabflow_core::domain::employee::EmployeeId;

use super::{
    decode_err, format_timestamp, parse_optional_timestamp, parse_timestamp, DecisionLink,
    DecisionLinkRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlDecisionLinkRepository {
    pool: DbPool,
}

impl SqlDecisionLinkRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DecisionLinkRepository for SqlDecisionLinkRepository {
    async fn issue(&self, link: DecisionLink) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO decision_link (token, reference_id, approver_employee_id, expires_at,
                used_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&link.token)
        .bind(&link.reference_id.0)
        .bind(&link.approver_id.0)
        .bind(format_timestamp(link.expires_at))
        .bind(link.used_at.map(format_timestamp))
        .bind(format_timestamp(link.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<DecisionLink>, RepositoryError> {
        let row = sqlx::query(
            "SELECT token, reference_id, approver_employee_id, expires_at, used_at, created_at
             FROM decision_link WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let expires_at: String = row.try_get("expires_at").map_err(decode_err)?;
        let created_at: String = row.try_get("created_at").map_err(decode_err)?;
        Ok(Some(DecisionLink {
            token: row.try_get("token").map_err(decode_err)?,
            reference_id: ReferenceId(row.try_get("reference_id").map_err(decode_err)?),
            approver_id: EmployeeId(row.try_get("approver_employee_id").map_err(decode_err)?),
            expires_at: parse_timestamp("expires_at", &expires_at)?,
            used_at: parse_optional_timestamp(
                "used_at",
                row.try_get("used_at").map_err(decode_err)?,
            )?,
            created_at: parse_timestamp("created_at", &created_at)?,
        }))
    }

    async fn consume(&self, token: &str, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let stamp = format_timestamp(at);
        let result = sqlx::query(
            "UPDATE decision_link SET used_at = ?
             WHERE token = ? AND used_at IS NULL AND expires_at > ?",
        )
        .bind(&stamp)
        .bind(token)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use cabflow_core::domain::employee::EmployeeId;

    use super::SqlDecisionLinkRepository;
    use crate::repositories::test_support::{at, sample_request, setup};
    use crate::repositories::{
        DecisionLink, DecisionLinkRepository, SqlTaxiRequestRepository, TaxiRequestRepository,
    };

    #[tokio::test]
    async fn link_can_only_be_consumed_once_and_before_expiry() {
        let pool = setup().await;
        let request = sample_request("TX-261018-LLLLLL", "E1001", "E2001");
        SqlTaxiRequestRepository::new(pool.clone()).save(request.clone()).await.expect("parent");
        let repo = SqlDecisionLinkRepository::new(pool);

        let issued_at = at(9);
        for token in ["tok-live", "tok-stale"] {
            repo.issue(DecisionLink {
                token: token.to_owned(),
                reference_id: request.id.clone(),
                approver_id: EmployeeId("E2001".to_owned()),
                expires_at: issued_at + Duration::hours(2),
                used_at: None,
                created_at: issued_at,
            })
            .await
            .expect("issue");
        }

        assert!(repo.consume("tok-live", at(10)).await.expect("consume"));
        assert!(!repo.consume("tok-live", at(10)).await.expect("second consume"));
        assert!(!repo.consume("tok-stale", at(12)).await.expect("expired consume"));
        assert!(!repo.consume("tok-missing", at(10)).await.expect("unknown token"));

        let used = repo.find("tok-live").await.expect("find").expect("present");
        assert_eq!(used.used_at, Some(at(10)));
        assert!(!used.is_usable(at(10)));
    }
}
