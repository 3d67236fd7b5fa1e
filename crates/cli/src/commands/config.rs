use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cabflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value) in effective_values(&config) {
        let env_key = env_key_for(key);
        let source = field_source(
            key,
            Some(env_key.as_str()),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.health_check_port", config.server.health_check_port.to_string()),
        ("server.public_base_url", config.server.public_base_url.clone()),
        ("auth.session_secret", redact_secret(config.auth.session_secret.expose_secret())),
        ("auth.session_ttl_hours", config.auth.session_ttl_hours.to_string()),
        ("sap.enabled", config.sap.enabled.to_string()),
        ("sap.base_url", config.sap.base_url.clone().unwrap_or_else(unset)),
        ("sap.company_id", config.sap.company_id.clone().unwrap_or_else(unset)),
        ("sap.username", config.sap.username.clone().unwrap_or_else(unset)),
        ("sap.password", presence(config.sap.password.is_some())),
        ("sap.cache_ttl_secs", config.sap.cache_ttl_secs.to_string()),
        ("smtp.enabled", config.smtp.enabled.to_string()),
        ("smtp.host", config.smtp.host.clone().unwrap_or_else(unset)),
        ("smtp.port", config.smtp.port.to_string()),
        ("smtp.password", presence(config.smtp.password.is_some())),
        ("smtp.from_address", config.smtp.from_address.clone()),
        ("whatsapp.enabled", config.whatsapp.enabled.to_string()),
        (
            "whatsapp.phone_number_id",
            config.whatsapp.phone_number_id.clone().unwrap_or_else(unset),
        ),
        ("whatsapp.access_token", presence(config.whatsapp.access_token.is_some())),
        ("whatsapp.default_country_code", config.whatsapp.default_country_code.clone()),
        ("admin.team_emails", config.admin.team_emails.join(",")),
        ("admin.team_phones", config.admin.team_phones.join(",")),
        ("budget.warning_threshold_pct", config.budget.warning_threshold_pct.to_string()),
        ("reminders.enabled", config.reminders.enabled.to_string()),
        ("reminders.interval_minutes", config.reminders.interval_minutes.to_string()),
        ("reminders.overdue_after_hours", config.reminders.overdue_after_hours.to_string()),
        ("reminders.max_reminders", config.reminders.max_reminders.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ]
}

/// `smtp.from_address` is read from `CABFLOW_SMTP_FROM_ADDRESS`.
fn env_key_for(key_path: &str) -> String {
    format!("CABFLOW_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn unset() -> String {
    "<unset>".to_string()
}

fn presence(set: bool) -> String {
    if set { "<redacted>" } else { "<unset>" }.to_string()
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("cabflow.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/cabflow.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    format!("<redacted, {} chars>", trimmed.chars().count())
}

#[cfg(test)]
mod tests {
    use super::{contains_path, env_key_for, redact_secret};

    #[test]
    fn env_keys_follow_the_section_and_field() {
        assert_eq!(env_key_for("reminders.max_reminders"), "CABFLOW_REMINDERS_MAX_REMINDERS");
        assert_eq!(env_key_for("server.public_base_url"), "CABFLOW_SERVER_PUBLIC_BASE_URL");
    }

    #[test]
    fn secrets_never_render_their_value() {
        assert_eq!(redact_secret("  "), "<empty>");
        let shown = redact_secret("0123456789abcdef0123456789abcdef");
        assert!(!shown.contains("0123"));
        assert!(shown.contains("32 chars"));
    }

    #[test]
    fn nested_key_lookup_walks_tables() {
        let doc: toml::Value = "[smtp]\nhost = \"relay\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "smtp.host"));
        assert!(!contains_path(&doc, "smtp.port"));
    }
}
