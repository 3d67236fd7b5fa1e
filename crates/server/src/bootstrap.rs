use std::sync::Arc;

use cabflow_core::config::{AppConfig, ConfigError, LoadOptions};
use cabflow_core::security::SessionSigner;
use cabflow_db::{connect_with_settings, migrations, DbPool};
use cabflow_notify::{
    EmailTemplates, Mailer, NoopMailer, NoopWhatsApp, NotificationDispatcher, SmtpMailer,
    WhatsAppClient, WhatsAppSender,
};
use chrono::Duration;
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use crate::decision_links::portal_pages;
use crate::directory::{directory_from_config, ProfileService};
use crate::state::{AppState, Repositories, WorkflowSettings};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("integration setup failed: {0}")]
    Integration(String),
    #[error("template setup failed: {0}")]
    Template(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let state = build_state(&config, Repositories::sql(db_pool.clone()))?;
    Ok(Application { config, db_pool, state })
}

/// Wires integrations from config. Channels that are switched off become
/// no-ops so the workflow runs unchanged without them.
pub fn build_state(config: &AppConfig, repos: Repositories) -> Result<AppState, BootstrapError> {
    let directory = directory_from_config(&config.sap)
        .map_err(|error| BootstrapError::Integration(format!("sap: {error}")))?;

    let mailer: Arc<dyn Mailer> = if config.smtp.enabled {
        Arc::new(
            SmtpMailer::from_config(&config.smtp)
                .map_err(|error| BootstrapError::Integration(format!("smtp: {error}")))?,
        )
    } else {
        Arc::new(NoopMailer)
    };
    let whatsapp: Arc<dyn WhatsAppSender> = if config.whatsapp.enabled {
        Arc::new(
            WhatsAppClient::from_config(&config.whatsapp)
                .map_err(|error| BootstrapError::Integration(format!("whatsapp: {error}")))?,
        )
    } else {
        Arc::new(NoopWhatsApp)
    };
    info!(
        event_name = "system.bootstrap.channels",
        correlation_id = "bootstrap",
        smtp = config.smtp.enabled,
        whatsapp = config.whatsapp.enabled,
        sap = config.sap.enabled,
        "notification channels configured"
    );

    let templates =
        EmailTemplates::embedded().map_err(|error| BootstrapError::Template(error.to_string()))?;
    let dispatcher = NotificationDispatcher::new(
        templates,
        mailer,
        whatsapp,
        config.whatsapp.language_code.clone(),
        config.whatsapp.default_country_code.clone(),
    );
    let pages = portal_pages().map_err(|error| BootstrapError::Template(error.to_string()))?;
    let signer = SessionSigner::new(
        config.auth.session_secret.expose_secret(),
        Duration::hours(config.auth.session_ttl_hours as i64),
    );

    Ok(AppState {
        profiles: Arc::new(ProfileService::new(directory, repos.overrides.clone())),
        repos,
        dispatcher: Arc::new(dispatcher),
        signer: Arc::new(signer),
        settings: Arc::new(WorkflowSettings::from_config(config)),
        pages: Arc::new(pages),
    })
}
