use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use cabflow_core::domain::employee::{ApproverContact, EmployeeId, EmployeeOverride};

use super::{decode_err, format_timestamp, EmployeeOverrideRepository, RepositoryError};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT employee_id, display_name, email, phone, department,
        location, manager_employee_id, manager_name, manager_email, manager_phone, note
    FROM employee_override";

pub struct SqlEmployeeOverrideRepository {
    pool: DbPool,
}

impl SqlEmployeeOverrideRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_override(row: &SqliteRow) -> Result<EmployeeOverride, RepositoryError> {
    let manager_id: Option<String> = row.try_get("manager_employee_id").map_err(decode_err)?;
    let manager = match manager_id {
        Some(id) => Some(ApproverContact {
            employee_id: EmployeeId(id),
            name: row
                .try_get::<Option<String>, _>("manager_name")
                .map_err(decode_err)?
                .unwrap_or_default(),
            email: row
                .try_get::<Option<String>, _>("manager_email")
                .map_err(decode_err)?
                .unwrap_or_default(),
            phone: row.try_get("manager_phone").map_err(decode_err)?,
        }),
        None => None,
    };

    Ok(EmployeeOverride {
        employee_id: EmployeeId(row.try_get("employee_id").map_err(decode_err)?),
        display_name: row.try_get("display_name").map_err(decode_err)?,
        email: row.try_get("email").map_err(decode_err)?,
        phone: row.try_get("phone").map_err(decode_err)?,
        department: row.try_get("department").map_err(decode_err)?,
        location: row.try_get("location").map_err(decode_err)?,
        manager,
        note: row.try_get("note").map_err(decode_err)?,
    })
}

#[async_trait::async_trait]
impl EmployeeOverrideRepository for SqlEmployeeOverrideRepository {
    async fn find(&self, id: &EmployeeId) -> Result<Option<EmployeeOverride>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE employee_id = ? COLLATE NOCASE"))
            .bind(id.as_str().trim())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_override).transpose()
    }

    async fn save(&self, patch: EmployeeOverride) -> Result<(), RepositoryError> {
        let manager = patch.manager.as_ref();
        sqlx::query(
            "INSERT INTO employee_override (employee_id, display_name, email, phone, department,
                location, manager_employee_id, manager_name, manager_email, manager_phone, note,
                updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(employee_id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email,
                phone = excluded.phone,
                department = excluded.department,
                location = excluded.location,
                manager_employee_id = excluded.manager_employee_id,
                manager_name = excluded.manager_name,
                manager_email = excluded.manager_email,
                manager_phone = excluded.manager_phone,
                note = excluded.note,
                updated_at = excluded.updated_at",
        )
        .bind(patch.employee_id.as_str().trim())
        .bind(&patch.display_name)
        .bind(&patch.email)
        .bind(&patch.phone)
        .bind(&patch.department)
        .bind(&patch.location)
        .bind(manager.map(|m| m.employee_id.0.clone()))
        .bind(manager.map(|m| m.name.clone()))
        .bind(manager.map(|m| m.email.clone()))
        .bind(manager.and_then(|m| m.phone.clone()))
        .bind(&patch.note)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &EmployeeId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM employee_override WHERE employee_id = ? COLLATE NOCASE")
                .bind(id.as_str().trim())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<EmployeeOverride>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY employee_id ASC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_override).collect()
    }
}

#[cfg(test)]
mod tests {
    use cabflow_core::domain::employee::{EmployeeId, EmployeeOverride};

    use super::SqlEmployeeOverrideRepository;
    use crate::repositories::test_support::{approver, setup};
    use crate::repositories::EmployeeOverrideRepository;

    #[tokio::test]
    async fn override_round_trip_with_manager_and_case_insensitive_lookup() {
        let repo = SqlEmployeeOverrideRepository::new(setup().await);
        let patch = EmployeeOverride {
            employee_id: EmployeeId("E1001".to_owned()),
            display_name: None,
            email: None,
            phone: Some("919812345678".to_owned()),
            department: Some("Finance".to_owned()),
            location: None,
            manager: Some(approver("E2001")),
            note: Some("SAP manager is on leave".to_owned()),
        };

        repo.save(patch.clone()).await.expect("save");
        let found = repo.find(&EmployeeId("e1001".to_owned())).await.expect("find");
        assert_eq!(found, Some(patch.clone()));

        let mut edited = patch;
        edited.manager = None;
        repo.save(edited.clone()).await.expect("update");
        assert_eq!(repo.list().await.expect("list"), vec![edited]);

        assert!(repo.delete(&EmployeeId("E1001".to_owned())).await.expect("delete"));
        assert!(!repo.delete(&EmployeeId("E1001".to_owned())).await.expect("delete again"));
    }
}
