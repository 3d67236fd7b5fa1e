use std::env;
use std::sync::{Mutex, OnceLock};

use cabflow_cli::commands::account::{self, NewAccount};
use cabflow_cli::commands::{migrate, remind, seed, start};
use serde_json::Value;

const SECRET: (&str, &str) =
    ("CABFLOW_AUTH_SESSION_SECRET", "cli-test-secret-0123456789abcdefghij");
const MEMORY_DB: (&str, &str) = ("CABFLOW_DATABASE_URL", "sqlite::memory:");

#[test]
fn start_returns_success_with_valid_env() {
    with_env(&[SECRET, MEMORY_DB], || {
        let result = start::run();
        assert_eq!(result.exit_code, 0, "expected successful start preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("sap=false"));
    });
}

#[test]
fn start_returns_config_failure_without_session_secret() {
    with_env(&[MEMORY_DB], || {
        let result = start::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn start_reports_incomplete_integration_settings() {
    with_env(&[SECRET, MEMORY_DB, ("CABFLOW_SAP_ENABLED", "true")], || {
        let result = start::run();
        assert_ne!(result.exit_code, 0, "enabled SAP without base url must not pass preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
    });
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[SECRET, MEMORY_DB], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn seed_reports_demo_dataset_summary() {
    with_env(&[SECRET, MEMORY_DB], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("accounts: asha, ravi, kiran, transport"));
        assert!(message.contains("routing rules: 2"));
        assert!(message.contains("TX-261001-DEMO01"));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    with_env(&[SECRET, MEMORY_DB], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");

        assert_eq!(
            parse_payload(&first.output)["message"],
            parse_payload(&second.output)["message"]
        );
    });
}

#[test]
fn account_add_validates_before_touching_the_database() {
    with_env(&[], || {
        let result = account::add(NewAccount {
            username: "priya".to_string(),
            employee_id: "E4001".to_string(),
            role: "driver".to_string(),
            password: "long-enough".to_string(),
        });
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "account add");
        assert_eq!(payload["error_class"], "invalid_input");
    });
}

#[test]
fn account_add_saves_with_valid_env() {
    with_env(&[SECRET, MEMORY_DB], || {
        let result = account::add(NewAccount {
            username: "Priya".to_string(),
            employee_id: "E4001".to_string(),
            role: "manager".to_string(),
            password: "long-enough".to_string(),
        });
        assert_eq!(result.exit_code, 0, "expected account save");

        let payload = parse_payload(&result.output);
        assert!(payload["message"].as_str().unwrap_or_default().contains("`priya`"));
    });
}

#[test]
fn remind_sweeps_an_empty_desk() {
    with_env(&[SECRET, MEMORY_DB], || {
        let result = remind::run();
        assert_eq!(result.exit_code, 0, "expected reminder sweep success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "remind");
        assert!(payload["message"].as_str().unwrap_or_default().starts_with("scanned 0"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CABFLOW_DATABASE_URL",
        "CABFLOW_DATABASE_MAX_CONNECTIONS",
        "CABFLOW_DATABASE_TIMEOUT_SECS",
        "CABFLOW_AUTH_SESSION_SECRET",
        "CABFLOW_AUTH_SESSION_TTL_HOURS",
        "CABFLOW_SAP_ENABLED",
        "CABFLOW_SAP_BASE_URL",
        "CABFLOW_SMTP_ENABLED",
        "CABFLOW_SMTP_HOST",
        "CABFLOW_WHATSAPP_ENABLED",
        "CABFLOW_ADMIN_TEAM_EMAILS",
        "CABFLOW_SERVER_BIND_ADDRESS",
        "CABFLOW_SERVER_PORT",
        "CABFLOW_SERVER_HEALTH_CHECK_PORT",
        "CABFLOW_REMINDERS_ENABLED",
        "CABFLOW_LOGGING_LEVEL",
        "CABFLOW_LOGGING_FORMAT",
        "CABFLOW_LOG_LEVEL",
        "CABFLOW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
