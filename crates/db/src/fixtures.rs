use crate::connection::DbPool;
use crate::repositories::{format_timestamp, RepositoryError};
use cabflow_core::security::hash_password;
use chrono::Utc;
use sqlx::Executor;

pub const DEMO_PASSWORD: &str = "cabflow-demo";

/// `(username, employee_id, role)` for every demo login.
pub const DEMO_ACCOUNTS: &[(&str, &str, &str)] = &[
    ("asha", "E1001", "employee"),
    ("ravi", "E2001", "manager"),
    ("kiran", "E2002", "manager"),
    ("transport", "E9001", "admin"),
];

const SEED_OVERRIDE_IDS: &[&str] = &["E1001", "E1002", "E2001", "E2002", "E9001"];
const SEED_RULE_IDS: &[i64] = &[1, 2];
const SEED_BUDGET_DEPARTMENTS: &[&str] = &["Finance", "Sales"];
const SEED_REQUESTS: &[(&str, &str)] =
    &[("TX-261001-DEMO01", "pending_manager_approval"), ("TX-261001-DEMO02", "approved")];

/// Demo accounts, routing rules, budgets, directory overrides and two sample
/// requests. Loading twice is a no-op.
pub struct DemoDataset;

impl DemoDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;
        Self::provision_accounts(pool).await?;

        Ok(SeedResult {
            accounts: DEMO_ACCOUNTS.iter().map(|(username, _, _)| *username).collect(),
            routing_rules: SEED_RULE_IDS.len(),
            budgets: SEED_BUDGET_DEPARTMENTS.len(),
            overrides: SEED_OVERRIDE_IDS.len(),
            requests: SEED_REQUESTS.iter().map(|(id, _)| *id).collect(),
        })
    }

    /// Hashes only for accounts that are missing, so reloading keeps the
    /// existing hashes and stays cheap.
    async fn provision_accounts(pool: &DbPool) -> Result<(), RepositoryError> {
        for (username, employee_id, role) in DEMO_ACCOUNTS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM employee_account WHERE username = ?1)",
            )
            .bind(username)
            .fetch_one(pool)
            .await?;
            if exists == 1 {
                continue;
            }

            let password_hash = hash_password(DEMO_PASSWORD)
                .map_err(|error| RepositoryError::Credential(error.to_string()))?;
            sqlx::query(
                "INSERT OR IGNORE INTO employee_account
                    (username, employee_id, role, password_hash, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            )
            .bind(username)
            .bind(employee_id)
            .bind(role)
            .bind(password_hash)
            .bind(format_timestamp(Utc::now()))
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (username, _, _) in DEMO_ACCOUNTS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM employee_account WHERE username = ?1 AND active = 1)",
            )
            .bind(username)
            .fetch_one(pool)
            .await?;
            checks.push((format!("account:{username}"), exists == 1));
        }

        for employee_id in SEED_OVERRIDE_IDS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM employee_override WHERE employee_id = ?1)",
            )
            .bind(employee_id)
            .fetch_one(pool)
            .await?;
            checks.push((format!("override:{employee_id}"), exists == 1));
        }

        for rule_id in SEED_RULE_IDS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM routing_rule WHERE id = ?1 AND active = 1)",
            )
            .bind(rule_id)
            .fetch_one(pool)
            .await?;
            checks.push((format!("routing_rule:{rule_id}"), exists == 1));
        }

        for department in SEED_BUDGET_DEPARTMENTS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM department_budget
                 WHERE department = ?1 AND period = strftime('%Y-%m', 'now'))",
            )
            .bind(department)
            .fetch_one(pool)
            .await?;
            checks.push((format!("budget:{department}"), exists == 1));
        }

        for (reference, status) in SEED_REQUESTS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM taxi_request WHERE reference_id = ?1 AND status = ?2)",
            )
            .bind(reference)
            .bind(status)
            .fetch_one(pool)
            .await?;
            checks.push((format!("request:{reference}"), exists == 1));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub accounts: Vec<&'static str>,
    pub routing_rules: usize,
    pub budgets: usize,
    pub overrides: usize,
    pub requests: Vec<&'static str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}
