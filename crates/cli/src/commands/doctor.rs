use cabflow_core::config::{AppConfig, LoadOptions};
use cabflow_db::{connect_with_settings, ping};
use cabflow_server::bootstrap::build_state;
use cabflow_server::state::Repositories;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\
                 \"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_integrations(&config));
            checks.push(check_notification_channels(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["integration_wiring", "notification_channels", "database_connectivity"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Builds the same state the server would, against in-memory storage, so
/// that SAP, SMTP, WhatsApp and template problems surface without a database.
fn check_integrations(config: &AppConfig) -> DoctorCheck {
    match build_state(config, Repositories::in_memory()) {
        Ok(_) => DoctorCheck {
            name: "integration_wiring",
            status: CheckStatus::Pass,
            details: format!(
                "directory={}, templates compiled",
                if config.sap.enabled { "sap" } else { "overrides only" }
            ),
        },
        Err(error) => DoctorCheck {
            name: "integration_wiring",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_notification_channels(config: &AppConfig) -> DoctorCheck {
    let enabled: Vec<&str> = [("email", config.smtp.enabled), ("whatsapp", config.whatsapp.enabled)]
        .into_iter()
        .filter_map(|(channel, on)| on.then_some(channel))
        .collect();

    if enabled.is_empty() {
        return DoctorCheck {
            name: "notification_channels",
            status: CheckStatus::Skipped,
            details: "no channel enabled; notifications are logged only".to_string(),
        };
    }
    if config.admin.team_emails.is_empty() && config.admin.team_phones.is_empty() {
        return DoctorCheck {
            name: "notification_channels",
            status: CheckStatus::Fail,
            details: "admin.team_emails and admin.team_phones are both empty".to_string(),
        };
    }
    DoctorCheck {
        name: "notification_channels",
        status: CheckStatus::Pass,
        details: format!("enabled: {}", enabled.join(", ")),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let pinged = ping(&pool).await.map_err(|error| format!("database query failed: {error}"));
        pool.close().await;
        pinged
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use cabflow_core::config::AppConfig;

    use super::{check_notification_channels, render_human, CheckStatus, DoctorCheck, DoctorReport};

    #[test]
    fn channels_without_admin_recipients_fail() {
        let mut config = AppConfig::default();
        assert_eq!(check_notification_channels(&config).status, CheckStatus::Skipped);

        config.smtp.enabled = true;
        assert_eq!(check_notification_channels(&config).status, CheckStatus::Fail);

        config.admin.team_emails = vec!["transport@example.com".to_string()];
        assert_eq!(check_notification_channels(&config).status, CheckStatus::Pass);
    }

    #[test]
    fn human_report_marks_each_check() {
        let report = DoctorReport {
            overall_status: CheckStatus::Fail,
            summary: "doctor: one or more readiness checks failed".to_string(),
            checks: vec![
                DoctorCheck {
                    name: "config_validation",
                    status: CheckStatus::Pass,
                    details: "ok".into(),
                },
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: "down".into(),
                },
            ],
        };
        let rendered = render_human(&report);
        assert!(rendered.contains("- [ok] config_validation: ok"));
        assert!(rendered.contains("- [fail] database_connectivity: down"));
    }
}
