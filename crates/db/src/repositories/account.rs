use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use cabflow_core::domain::account::{EmployeeAccount, Role};
use cabflow_core::domain::employee::EmployeeId;

use super::{decode_err, format_timestamp, parse_timestamp, AccountRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAccountRepository {
    pool: DbPool,
}

impl SqlAccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_account(row: &SqliteRow) -> Result<EmployeeAccount, RepositoryError> {
    let role_key: String = row.try_get("role").map_err(decode_err)?;
    let role = Role::parse_key(&role_key)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{role_key}`")))?;
    let active: i64 = row.try_get("active").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(EmployeeAccount {
        username: row.try_get("username").map_err(decode_err)?,
        employee_id: EmployeeId(row.try_get("employee_id").map_err(decode_err)?),
        role,
        password_hash: row.try_get("password_hash").map_err(decode_err)?,
        active: active != 0,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl AccountRepository for SqlAccountRepository {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<EmployeeAccount>, RepositoryError> {
        let row = sqlx::query(
            "SELECT username, employee_id, role, password_hash, active, created_at
             FROM employee_account WHERE username = ? COLLATE NOCASE",
        )
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn save(&self, account: EmployeeAccount) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO employee_account (username, employee_id, role, password_hash, active,
                created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET
                employee_id = excluded.employee_id,
                role = excluded.role,
                password_hash = excluded.password_hash,
                active = excluded.active",
        )
        .bind(account.username.trim().to_ascii_lowercase())
        .bind(&account.employee_id.0)
        .bind(account.role.as_key())
        .bind(&account.password_hash)
        .bind(account.active)
        .bind(format_timestamp(account.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cabflow_core::domain::account::{EmployeeAccount, Role};
    use cabflow_core::domain::employee::EmployeeId;
    use cabflow_core::security::{hash_password, verify_password};

    use super::SqlAccountRepository;
    use crate::repositories::test_support::{at, setup};
    use crate::repositories::AccountRepository;

    #[tokio::test]
    async fn account_lookup_is_case_insensitive_and_password_verifies() {
        let repo = SqlAccountRepository::new(setup().await);
        repo.save(EmployeeAccount {
            username: "Ravi.K".to_owned(),
            employee_id: EmployeeId("E2001".to_owned()),
            role: Role::Manager,
            password_hash: hash_password("correct horse").expect("hash"),
            active: true,
            created_at: at(8),
        })
        .await
        .expect("save");

        let found = repo.find_by_username("RAVI.k").await.expect("find").expect("present");
        assert_eq!(found.username, "ravi.k");
        assert_eq!(found.role, Role::Manager);
        assert!(verify_password("correct horse", &found.password_hash));
        assert!(!verify_password("wrong", &found.password_hash));
        assert!(repo.find_by_username("nobody").await.expect("find").is_none());
    }
}
