use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_SESSION_SECRET_LEN: usize = 32;
/// One sweep a day at the slowest.
pub const MAX_REMINDER_INTERVAL_MINUTES: u64 = 24 * 60;
/// Thirty days.
pub const MAX_OVERDUE_AFTER_HOURS: u64 = 30 * 24;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub sap: SapConfig,
    pub smtp: SmtpConfig,
    pub whatsapp: WhatsAppConfig,
    pub admin: AdminConfig,
    pub budget: BudgetConfig,
    pub reminders: RemindersConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
    pub public_base_url: String,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub session_secret: SecretString,
    pub session_ttl_hours: u64,
}

#[derive(Clone, Debug)]
pub struct SapConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub company_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub cache_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from_address: String,
    pub from_name: String,
    pub starttls: bool,
}

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub enabled: bool,
    pub api_base_url: String,
    pub api_version: String,
    pub phone_number_id: Option<String>,
    pub access_token: Option<SecretString>,
    pub language_code: String,
    pub default_country_code: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug, Default)]
pub struct AdminConfig {
    pub team_emails: Vec<String>,
    pub team_phones: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct BudgetConfig {
    pub warning_threshold_pct: u8,
}

#[derive(Clone, Debug)]
pub struct RemindersConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub overdue_after_hours: u64,
    pub max_reminders: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub session_secret: Option<String>,
    pub public_base_url: Option<String>,
    pub sap_enabled: Option<bool>,
    pub smtp_enabled: Option<bool>,
    pub whatsapp_enabled: Option<bool>,
    pub reminders_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://cabflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
                public_base_url: "http://localhost:8000".to_string(),
            },
            auth: AuthConfig { session_secret: String::new().into(), session_ttl_hours: 12 },
            sap: SapConfig {
                enabled: false,
                base_url: None,
                company_id: None,
                username: None,
                password: None,
                timeout_secs: 20,
                max_retries: 2,
                cache_ttl_secs: 900,
            },
            smtp: SmtpConfig {
                enabled: false,
                host: None,
                port: 587,
                username: None,
                password: None,
                from_address: "taxi-desk@localhost".to_string(),
                from_name: "Taxi Desk".to_string(),
                starttls: true,
            },
            whatsapp: WhatsAppConfig {
                enabled: false,
                api_base_url: "https://graph.facebook.com".to_string(),
                api_version: "v19.0".to_string(),
                phone_number_id: None,
                access_token: None,
                language_code: "en".to_string(),
                default_country_code: "91".to_string(),
                timeout_secs: 15,
                max_retries: 2,
            },
            admin: AdminConfig::default(),
            budget: BudgetConfig { warning_threshold_pct: 80 },
            reminders: RemindersConfig {
                enabled: true,
                interval_minutes: 30,
                overdue_after_hours: 4,
                max_reminders: 3,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cabflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(public_base_url) = server.public_base_url {
                self.server.public_base_url = public_base_url;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(session_secret_value) = auth.session_secret {
                self.auth.session_secret = secret_value(session_secret_value);
            }
            if let Some(session_ttl_hours) = auth.session_ttl_hours {
                self.auth.session_ttl_hours = session_ttl_hours;
            }
        }

        if let Some(sap) = patch.sap {
            if let Some(enabled) = sap.enabled {
                self.sap.enabled = enabled;
            }
            if let Some(base_url) = sap.base_url {
                self.sap.base_url = Some(base_url);
            }
            if let Some(company_id) = sap.company_id {
                self.sap.company_id = Some(company_id);
            }
            if let Some(username) = sap.username {
                self.sap.username = Some(username);
            }
            if let Some(sap_password_value) = sap.password {
                self.sap.password = Some(secret_value(sap_password_value));
            }
            if let Some(timeout_secs) = sap.timeout_secs {
                self.sap.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = sap.max_retries {
                self.sap.max_retries = max_retries;
            }
            if let Some(cache_ttl_secs) = sap.cache_ttl_secs {
                self.sap.cache_ttl_secs = cache_ttl_secs;
            }
        }

        if let Some(smtp) = patch.smtp {
            if let Some(enabled) = smtp.enabled {
                self.smtp.enabled = enabled;
            }
            if let Some(host) = smtp.host {
                self.smtp.host = Some(host);
            }
            if let Some(port) = smtp.port {
                self.smtp.port = port;
            }
            if let Some(username) = smtp.username {
                self.smtp.username = Some(username);
            }
            if let Some(smtp_password_value) = smtp.password {
                self.smtp.password = Some(secret_value(smtp_password_value));
            }
            if let Some(from_address) = smtp.from_address {
                self.smtp.from_address = from_address;
            }
            if let Some(from_name) = smtp.from_name {
                self.smtp.from_name = from_name;
            }
            if let Some(starttls) = smtp.starttls {
                self.smtp.starttls = starttls;
            }
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(enabled) = whatsapp.enabled {
                self.whatsapp.enabled = enabled;
            }
            if let Some(api_base_url) = whatsapp.api_base_url {
                self.whatsapp.api_base_url = api_base_url;
            }
            if let Some(api_version) = whatsapp.api_version {
                self.whatsapp.api_version = api_version;
            }
            if let Some(phone_number_id) = whatsapp.phone_number_id {
                self.whatsapp.phone_number_id = Some(phone_number_id);
            }
            if let Some(access_token_value) = whatsapp.access_token {
                self.whatsapp.access_token = Some(secret_value(access_token_value));
            }
            if let Some(language_code) = whatsapp.language_code {
                self.whatsapp.language_code = language_code;
            }
            if let Some(default_country_code) = whatsapp.default_country_code {
                self.whatsapp.default_country_code = default_country_code;
            }
            if let Some(timeout_secs) = whatsapp.timeout_secs {
                self.whatsapp.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = whatsapp.max_retries {
                self.whatsapp.max_retries = max_retries;
            }
        }

        if let Some(admin) = patch.admin {
            if let Some(team_emails) = admin.team_emails {
                self.admin.team_emails = team_emails;
            }
            if let Some(team_phones) = admin.team_phones {
                self.admin.team_phones = team_phones;
            }
        }

        if let Some(budget) = patch.budget {
            if let Some(warning_threshold_pct) = budget.warning_threshold_pct {
                self.budget.warning_threshold_pct = warning_threshold_pct;
            }
        }

        if let Some(reminders) = patch.reminders {
            if let Some(enabled) = reminders.enabled {
                self.reminders.enabled = enabled;
            }
            if let Some(interval_minutes) = reminders.interval_minutes {
                self.reminders.interval_minutes = interval_minutes;
            }
            if let Some(overdue_after_hours) = reminders.overdue_after_hours {
                self.reminders.overdue_after_hours = overdue_after_hours;
            }
            if let Some(max_reminders) = reminders.max_reminders {
                self.reminders.max_reminders = max_reminders;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CABFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CABFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("CABFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CABFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CABFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CABFLOW_SERVER_PORT") {
            self.server.port = parse_u16("CABFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("CABFLOW_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CABFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_SERVER_PUBLIC_BASE_URL") {
            self.server.public_base_url = value;
        }

        if let Some(value) = read_env("CABFLOW_AUTH_SESSION_SECRET") {
            self.auth.session_secret = secret_value(value);
        }
        if let Some(value) = read_env("CABFLOW_AUTH_SESSION_TTL_HOURS") {
            self.auth.session_ttl_hours = parse_u64("CABFLOW_AUTH_SESSION_TTL_HOURS", &value)?;
        }

        if let Some(value) = read_env("CABFLOW_SAP_ENABLED") {
            self.sap.enabled = parse_bool("CABFLOW_SAP_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_SAP_BASE_URL") {
            self.sap.base_url = Some(value);
        }
        if let Some(value) = read_env("CABFLOW_SAP_COMPANY_ID") {
            self.sap.company_id = Some(value);
        }
        if let Some(value) = read_env("CABFLOW_SAP_USERNAME") {
            self.sap.username = Some(value);
        }
        if let Some(value) = read_env("CABFLOW_SAP_PASSWORD") {
            self.sap.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("CABFLOW_SAP_TIMEOUT_SECS") {
            self.sap.timeout_secs = parse_u64("CABFLOW_SAP_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_SAP_MAX_RETRIES") {
            self.sap.max_retries = parse_u32("CABFLOW_SAP_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_SAP_CACHE_TTL_SECS") {
            self.sap.cache_ttl_secs = parse_u64("CABFLOW_SAP_CACHE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("CABFLOW_SMTP_ENABLED") {
            self.smtp.enabled = parse_bool("CABFLOW_SMTP_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_SMTP_HOST") {
            self.smtp.host = Some(value);
        }
        if let Some(value) = read_env("CABFLOW_SMTP_PORT") {
            self.smtp.port = parse_u16("CABFLOW_SMTP_PORT", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_SMTP_USERNAME") {
            self.smtp.username = Some(value);
        }
        if let Some(value) = read_env("CABFLOW_SMTP_PASSWORD") {
            self.smtp.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("CABFLOW_SMTP_FROM_ADDRESS") {
            self.smtp.from_address = value;
        }
        if let Some(value) = read_env("CABFLOW_SMTP_FROM_NAME") {
            self.smtp.from_name = value;
        }
        if let Some(value) = read_env("CABFLOW_SMTP_STARTTLS") {
            self.smtp.starttls = parse_bool("CABFLOW_SMTP_STARTTLS", &value)?;
        }

        if let Some(value) = read_env("CABFLOW_WHATSAPP_ENABLED") {
            self.whatsapp.enabled = parse_bool("CABFLOW_WHATSAPP_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_WHATSAPP_API_BASE_URL") {
            self.whatsapp.api_base_url = value;
        }
        if let Some(value) = read_env("CABFLOW_WHATSAPP_API_VERSION") {
            self.whatsapp.api_version = value;
        }
        if let Some(value) = read_env("CABFLOW_WHATSAPP_PHONE_NUMBER_ID") {
            self.whatsapp.phone_number_id = Some(value);
        }
        if let Some(value) = read_env("CABFLOW_WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CABFLOW_WHATSAPP_LANGUAGE_CODE") {
            self.whatsapp.language_code = value;
        }
        if let Some(value) = read_env("CABFLOW_WHATSAPP_DEFAULT_COUNTRY_CODE") {
            self.whatsapp.default_country_code = value;
        }

        if let Some(value) = read_env("CABFLOW_ADMIN_TEAM_EMAILS") {
            self.admin.team_emails = split_list(&value);
        }
        if let Some(value) = read_env("CABFLOW_ADMIN_TEAM_PHONES") {
            self.admin.team_phones = split_list(&value);
        }

        if let Some(value) = read_env("CABFLOW_BUDGET_WARNING_THRESHOLD_PCT") {
            self.budget.warning_threshold_pct =
                parse_u8("CABFLOW_BUDGET_WARNING_THRESHOLD_PCT", &value)?;
        }

        if let Some(value) = read_env("CABFLOW_REMINDERS_ENABLED") {
            self.reminders.enabled = parse_bool("CABFLOW_REMINDERS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_REMINDERS_INTERVAL_MINUTES") {
            self.reminders.interval_minutes =
                parse_u64("CABFLOW_REMINDERS_INTERVAL_MINUTES", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_REMINDERS_OVERDUE_AFTER_HOURS") {
            self.reminders.overdue_after_hours =
                parse_u64("CABFLOW_REMINDERS_OVERDUE_AFTER_HOURS", &value)?;
        }
        if let Some(value) = read_env("CABFLOW_REMINDERS_MAX_REMINDERS") {
            self.reminders.max_reminders = parse_u32("CABFLOW_REMINDERS_MAX_REMINDERS", &value)?;
        }

        let log_level =
            read_env("CABFLOW_LOGGING_LEVEL").or_else(|| read_env("CABFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CABFLOW_LOGGING_FORMAT").or_else(|| read_env("CABFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(session_secret) = overrides.session_secret {
            self.auth.session_secret = secret_value(session_secret);
        }
        if let Some(public_base_url) = overrides.public_base_url {
            self.server.public_base_url = public_base_url;
        }
        if let Some(enabled) = overrides.sap_enabled {
            self.sap.enabled = enabled;
        }
        if let Some(enabled) = overrides.smtp_enabled {
            self.smtp.enabled = enabled;
        }
        if let Some(enabled) = overrides.whatsapp_enabled {
            self.whatsapp.enabled = enabled;
        }
        if let Some(enabled) = overrides.reminders_enabled {
            self.reminders.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_auth(&self.auth)?;
        validate_sap(&self.sap)?;
        validate_smtp(&self.smtp)?;
        validate_whatsapp(&self.whatsapp)?;
        validate_admin(&self.admin)?;
        validate_budget(&self.budget)?;
        validate_reminders(&self.reminders)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cabflow.toml"), PathBuf::from("config/cabflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.health_check_port == server.port {
        return Err(ConfigError::Validation(
            "server.health_check_port must differ from server.port".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if !is_http_url(&server.public_base_url) {
        return Err(ConfigError::Validation(
            "server.public_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let secret = auth.session_secret.expose_secret();
    if secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "auth.session_secret is required (set CABFLOW_AUTH_SESSION_SECRET)".to_string(),
        ));
    }
    if secret.len() < MIN_SESSION_SECRET_LEN {
        return Err(ConfigError::Validation(format!(
            "auth.session_secret must be at least {MIN_SESSION_SECRET_LEN} characters"
        )));
    }

    if auth.session_ttl_hours == 0 || auth.session_ttl_hours > 168 {
        return Err(ConfigError::Validation(
            "auth.session_ttl_hours must be in range 1..=168".to_string(),
        ));
    }

    Ok(())
}

fn validate_sap(sap: &SapConfig) -> Result<(), ConfigError> {
    if sap.timeout_secs == 0 || sap.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "sap.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !sap.enabled {
        return Ok(());
    }

    match sap.base_url.as_deref() {
        Some(url) if is_http_url(url) => {}
        Some(_) => {
            return Err(ConfigError::Validation(
                "sap.base_url must start with http:// or https://".to_string(),
            ))
        }
        None => {
            return Err(ConfigError::Validation(
                "sap.base_url is required when sap.enabled is true".to_string(),
            ))
        }
    }

    if is_blank(sap.company_id.as_deref()) {
        return Err(ConfigError::Validation(
            "sap.company_id is required when sap.enabled is true".to_string(),
        ));
    }
    if is_blank(sap.username.as_deref()) {
        return Err(ConfigError::Validation(
            "sap.username is required when sap.enabled is true".to_string(),
        ));
    }
    if is_blank(sap.password.as_ref().map(|value| value.expose_secret())) {
        return Err(ConfigError::Validation(
            "sap.password is required when sap.enabled is true".to_string(),
        ));
    }

    Ok(())
}

fn validate_smtp(smtp: &SmtpConfig) -> Result<(), ConfigError> {
    if !smtp.from_address.contains('@') {
        return Err(ConfigError::Validation(
            "smtp.from_address must be an email address".to_string(),
        ));
    }

    if !smtp.enabled {
        return Ok(());
    }

    if is_blank(smtp.host.as_deref()) {
        return Err(ConfigError::Validation(
            "smtp.host is required when smtp.enabled is true".to_string(),
        ));
    }
    if smtp.port == 0 {
        return Err(ConfigError::Validation("smtp.port must be greater than zero".to_string()));
    }
    if smtp.username.is_some() != smtp.password.is_some() {
        return Err(ConfigError::Validation(
            "smtp.username and smtp.password must be set together".to_string(),
        ));
    }

    Ok(())
}

fn validate_whatsapp(whatsapp: &WhatsAppConfig) -> Result<(), ConfigError> {
    let country_code = whatsapp.default_country_code.trim().trim_start_matches('+');
    if country_code.is_empty()
        || country_code.len() > 3
        || !country_code.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ConfigError::Validation(
            "whatsapp.default_country_code must be 1-3 digits".to_string(),
        ));
    }

    if !whatsapp.enabled {
        return Ok(());
    }

    if !is_http_url(&whatsapp.api_base_url) {
        return Err(ConfigError::Validation(
            "whatsapp.api_base_url must start with http:// or https://".to_string(),
        ));
    }
    if is_blank(whatsapp.phone_number_id.as_deref()) {
        return Err(ConfigError::Validation(
            "whatsapp.phone_number_id is required when whatsapp.enabled is true".to_string(),
        ));
    }
    if is_blank(whatsapp.access_token.as_ref().map(|value| value.expose_secret())) {
        return Err(ConfigError::Validation(
            "whatsapp.access_token is required when whatsapp.enabled is true".to_string(),
        ));
    }
    if whatsapp.timeout_secs == 0 || whatsapp.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "whatsapp.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_admin(admin: &AdminConfig) -> Result<(), ConfigError> {
    if let Some(bad) = admin.team_emails.iter().find(|email| !email.contains('@')) {
        return Err(ConfigError::Validation(format!(
            "admin.team_emails contains an invalid address `{bad}`"
        )));
    }
    Ok(())
}

fn validate_budget(budget: &BudgetConfig) -> Result<(), ConfigError> {
    if budget.warning_threshold_pct == 0 || budget.warning_threshold_pct > 100 {
        return Err(ConfigError::Validation(
            "budget.warning_threshold_pct must be in range 1..=100".to_string(),
        ));
    }
    Ok(())
}

fn validate_reminders(reminders: &RemindersConfig) -> Result<(), ConfigError> {
    if !(1..=MAX_REMINDER_INTERVAL_MINUTES).contains(&reminders.interval_minutes) {
        return Err(ConfigError::Validation(format!(
            "reminders.interval_minutes must be in range 1..={MAX_REMINDER_INTERVAL_MINUTES}"
        )));
    }
    if !(1..=MAX_OVERDUE_AFTER_HOURS).contains(&reminders.overdue_after_hours) {
        return Err(ConfigError::Validation(format!(
            "reminders.overdue_after_hours must be in range 1..={MAX_OVERDUE_AFTER_HOURS}"
        )));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|value| value.trim().is_empty()).unwrap_or(true)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.parse::<u8>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    auth: Option<AuthPatch>,
    sap: Option<SapPatch>,
    smtp: Option<SmtpPatch>,
    whatsapp: Option<WhatsAppPatch>,
    admin: Option<AdminPatch>,
    budget: Option<BudgetPatch>,
    reminders: Option<RemindersPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    public_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    session_secret: Option<String>,
    session_ttl_hours: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SapPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    company_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SmtpPatch {
    enabled: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    from_address: Option<String>,
    from_name: Option<String>,
    starttls: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    enabled: Option<bool>,
    api_base_url: Option<String>,
    api_version: Option<String>,
    phone_number_id: Option<String>,
    access_token: Option<String>,
    language_code: Option<String>,
    default_country_code: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AdminPatch {
    team_emails: Option<Vec<String>>,
    team_phones: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct BudgetPatch {
    warning_threshold_pct: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct RemindersPatch {
    enabled: Option<bool>,
    interval_minutes: Option<u64>,
    overdue_after_hours: Option<u64>,
    max_reminders: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
