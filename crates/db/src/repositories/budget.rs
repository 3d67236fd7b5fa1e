use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use cabflow_core::budget::{BudgetPeriod, DepartmentBudget};

use super::{decode_err, format_timestamp, parse_decimal, BudgetRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBudgetRepository {
    pool: DbPool,
}

impl SqlBudgetRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_budget(row: &SqliteRow) -> Result<DepartmentBudget, RepositoryError> {
    let allocated: String = row.try_get("allocated").map_err(decode_err)?;
    let spent: String = row.try_get("spent").map_err(decode_err)?;
    let period: String = row.try_get("period").map_err(decode_err)?;
    Ok(DepartmentBudget {
        department: row.try_get("department").map_err(decode_err)?,
        period: BudgetPeriod::parse(&period).map_err(decode_err)?,
        allocated: parse_decimal("allocated", &allocated)?,
        spent: parse_decimal("spent", &spent)?,
    })
}

#[async_trait::async_trait]
impl BudgetRepository for SqlBudgetRepository {
    async fn find(
        &self,
        department: &str,
        period: &BudgetPeriod,
    ) -> Result<Option<DepartmentBudget>, RepositoryError> {
        let row = sqlx::query(
            "SELECT department, period, allocated, spent FROM department_budget
             WHERE department = ? COLLATE NOCASE AND period = ?",
        )
        .bind(department.trim())
        .bind(period.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_budget).transpose()
    }

    async fn upsert_allocation(
        &self,
        department: &str,
        period: &BudgetPeriod,
        allocated: Decimal,
    ) -> Result<DepartmentBudget, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            "SELECT department, period, allocated, spent FROM department_budget
             WHERE department = ? COLLATE NOCASE AND period = ?",
        )
        .bind(department.trim())
        .bind(period.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let budget = match existing.as_ref().map(row_to_budget).transpose()? {
            Some(current) => {
                sqlx::query(
                    "UPDATE department_budget SET allocated = ?, updated_at = ?
                     WHERE department = ? AND period = ?",
                )
                .bind(allocated.to_string())
                .bind(format_timestamp(Utc::now()))
                .bind(&current.department)
                .bind(period.as_str())
                .execute(&mut *tx)
                .await?;
                DepartmentBudget { allocated, ..current }
            }
            None => {
                sqlx::query(
                    "INSERT INTO department_budget
                         (department, period, allocated, spent, updated_at)
                     VALUES (?, ?, ?, '0', ?)",
                )
                .bind(department.trim())
                .bind(period.as_str())
                .bind(allocated.to_string())
                .bind(format_timestamp(Utc::now()))
                .execute(&mut *tx)
                .await?;
                DepartmentBudget {
                    department: department.trim().to_owned(),
                    period: period.clone(),
                    allocated,
                    spent: Decimal::ZERO,
                }
            }
        };

        tx.commit().await?;
        Ok(budget)
    }

    async fn add_spend(
        &self,
        department: &str,
        period: &BudgetPeriod,
        amount: Decimal,
    ) -> Result<Option<DepartmentBudget>, RepositoryError> {
        // Decimal text columns cannot be summed in SQL without float loss.
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT department, period, allocated, spent FROM department_budget
             WHERE department = ? COLLATE NOCASE AND period = ?",
        )
        .bind(department.trim())
        .bind(period.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = row.as_ref().map(row_to_budget).transpose()? else {
            return Ok(None);
        };
        let spent = (current.spent + amount).max(Decimal::ZERO);

        sqlx::query(
            "UPDATE department_budget SET spent = ?, updated_at = ?
             WHERE department = ? AND period = ?",
        )
        .bind(spent.to_string())
        .bind(format_timestamp(Utc::now()))
        .bind(&current.department)
        .bind(period.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(DepartmentBudget { spent, ..current }))
    }

    async fn list_period(
        &self,
        period: &BudgetPeriod,
    ) -> Result<Vec<DepartmentBudget>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT department, period, allocated, spent FROM department_budget
             WHERE period = ? ORDER BY department ASC",
        )
        .bind(period.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_budget).collect()
    }
}
