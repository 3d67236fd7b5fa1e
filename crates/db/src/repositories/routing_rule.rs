use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use cabflow_core::domain::employee::{ApproverContact, EmployeeId};
use cabflow_core::routing::RoutingRule;

use super::{decode_err, format_timestamp, RepositoryError, RoutingRuleRepository};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT id, priority, department, location, employee_id,
        approver_employee_id, approver_name, approver_email, approver_phone, active, note
    FROM routing_rule";

pub struct SqlRoutingRuleRepository {
    pool: DbPool,
}

impl SqlRoutingRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_rule(row: &SqliteRow) -> Result<RoutingRule, RepositoryError> {
    let priority: i64 = row.try_get("priority").map_err(decode_err)?;
    let active: i64 = row.try_get("active").map_err(decode_err)?;
    let employee_id: Option<String> = row.try_get("employee_id").map_err(decode_err)?;

    Ok(RoutingRule {
        id: row.try_get("id").map_err(decode_err)?,
        priority: i32::try_from(priority).map_err(decode_err)?,
        department: row.try_get("department").map_err(decode_err)?,
        location: row.try_get("location").map_err(decode_err)?,
        employee_id: employee_id.map(EmployeeId),
        approver: ApproverContact {
            employee_id: EmployeeId(row.try_get("approver_employee_id").map_err(decode_err)?),
            name: row.try_get("approver_name").map_err(decode_err)?,
            email: row.try_get("approver_email").map_err(decode_err)?,
            phone: row.try_get("approver_phone").map_err(decode_err)?,
        },
        active: active != 0,
        note: row.try_get("note").map_err(decode_err)?,
    })
}

#[async_trait::async_trait]
impl RoutingRuleRepository for SqlRoutingRuleRepository {
    async fn list_active(&self) -> Result<Vec<RoutingRule>, RepositoryError> {
        let rows =
            sqlx::query(&format!("{SELECT_COLUMNS} WHERE active = 1 ORDER BY priority ASC, id ASC"))
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_rule).collect()
    }

    async fn list_all(&self) -> Result<Vec<RoutingRule>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY priority ASC, id ASC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_rule).collect()
    }

    async fn find(&self, id: i64) -> Result<Option<RoutingRule>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_rule).transpose()
    }

    async fn save(&self, rule: RoutingRule) -> Result<RoutingRule, RepositoryError> {
        let now = format_timestamp(Utc::now());
        let employee_id = rule.employee_id.as_ref().map(|id| id.0.clone());

        let id = if rule.id == 0 {
            sqlx::query(
                "INSERT INTO routing_rule (priority, department, location, employee_id,
                    approver_employee_id, approver_name, approver_email, approver_phone, active,
                    note, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(rule.priority)
            .bind(&rule.department)
            .bind(&rule.location)
            .bind(&employee_id)
            .bind(&rule.approver.employee_id.0)
            .bind(&rule.approver.name)
            .bind(&rule.approver.email)
            .bind(&rule.approver.phone)
            .bind(rule.active)
            .bind(&rule.note)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await?
            .last_insert_rowid()
        } else {
            let result = sqlx::query(
                "UPDATE routing_rule SET priority = ?, department = ?, location = ?,
                    employee_id = ?, approver_employee_id = ?, approver_name = ?,
                    approver_email = ?, approver_phone = ?, active = ?, note = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(rule.priority)
            .bind(&rule.department)
            .bind(&rule.location)
            .bind(&employee_id)
            .bind(&rule.approver.employee_id.0)
            .bind(&rule.approver.name)
            .bind(&rule.approver.email)
            .bind(&rule.approver.phone)
            .bind(rule.active)
            .bind(&rule.note)
            .bind(&now)
            .bind(rule.id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(RepositoryError::Conflict(format!(
                    "routing rule {} does not exist",
                    rule.id
                )));
            }
            rule.id
        };

        Ok(RoutingRule { id, ..rule })
    }

    async fn deactivate(&self, id: i64) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE routing_rule SET active = 0, updated_at = ? WHERE id = ? AND active = 1",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
