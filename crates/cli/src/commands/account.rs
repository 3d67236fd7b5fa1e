use chrono::Utc;

use cabflow_core::domain::account::{EmployeeAccount, Role};
use cabflow_core::domain::employee::EmployeeId;
use cabflow_core::security::hash_password;
use cabflow_db::repositories::{AccountRepository, SqlAccountRepository};

use crate::commands::{connect_and_migrate, exit, load_config, runtime, CommandResult};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAccount {
    pub username: String,
    pub employee_id: String,
    pub role: String,
    pub password: String,
}

/// Creates a login, or resets password and role when the username exists.
pub fn add(input: NewAccount) -> CommandResult {
    let (account, role) = match prepare(input) {
        Ok(prepared) => prepared,
        Err(message) => {
            return CommandResult::failure("account add", "invalid_input", message, exit::CONFIG);
        }
    };

    let config = match load_config("account add") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("account add") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let username = account.username.clone();
    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        let saved = SqlAccountRepository::new(pool.clone())
            .save(account)
            .await
            .map_err(|error| ("account_save", error.to_string(), exit::EXECUTION));
        pool.close().await;
        saved
    });

    match result {
        Ok(()) => CommandResult::success(
            "account add",
            format!("account `{username}` saved with role {}", role.as_key()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("account add", error_class, message, exit_code)
        }
    }
}

fn prepare(input: NewAccount) -> Result<(EmployeeAccount, Role), String> {
    let username = input.username.trim().to_ascii_lowercase();
    let employee_id = input.employee_id.trim().to_string();
    if username.is_empty() || employee_id.is_empty() {
        return Err("username and employee id are required".to_string());
    }
    let role = Role::parse_key(&input.role)
        .ok_or_else(|| format!("unknown role `{}` (expected employee|manager|admin)", input.role))?;
    if input.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!("password must be at least {MIN_PASSWORD_LEN} characters"));
    }

    let password_hash = hash_password(&input.password).map_err(|error| error.to_string())?;
    let account = EmployeeAccount {
        username,
        employee_id: EmployeeId(employee_id),
        role,
        password_hash,
        active: true,
        created_at: Utc::now(),
    };
    Ok((account, role))
}

#[cfg(test)]
mod tests {
    use cabflow_core::domain::account::Role;
    use cabflow_core::security::verify_password;

    use super::{prepare, NewAccount};

    fn input(role: &str, password: &str) -> NewAccount {
        NewAccount {
            username: " Priya ".to_string(),
            employee_id: "E4001".to_string(),
            role: role.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn prepare_normalizes_username_and_hashes_password() {
        let (account, role) = prepare(input("HOD", "long-enough")).expect("valid");
        assert_eq!(account.username, "priya");
        assert_eq!(role, Role::Manager);
        assert!(verify_password("long-enough", &account.password_hash));
    }

    #[test]
    fn prepare_rejects_unknown_role_and_short_password() {
        assert!(prepare(input("driver", "long-enough")).unwrap_err().contains("unknown role"));
        assert!(prepare(input("admin", "short")).unwrap_err().contains("at least"));
    }
}
