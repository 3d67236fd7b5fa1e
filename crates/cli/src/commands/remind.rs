use chrono::Utc;

use cabflow_core::config::AppConfig;
use cabflow_db::DbPool;
use cabflow_server::bootstrap::build_state;
use cabflow_server::reminders::{run_sweep, ReminderSummary};
use cabflow_server::state::Repositories;

use crate::commands::{
    connect_and_migrate, exit, load_config, runtime, CommandResult, StepFailure,
};

/// One reminder sweep, for cron setups that keep the in-process job off.
pub fn run() -> CommandResult {
    let config = match load_config("remind") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("remind") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        let swept = sweep(&config, pool.clone()).await;
        pool.close().await;
        swept
    });

    match result {
        Ok(summary) => CommandResult::success(
            "remind",
            format!(
                "scanned {} overdue request(s): {} manager reminder(s), \
                 {} admin reminder(s), {} failed",
                summary.scanned, summary.manager_reminders, summary.admin_reminders, summary.failed
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("remind", error_class, message, exit_code)
        }
    }
}

async fn sweep(config: &AppConfig, pool: DbPool) -> Result<ReminderSummary, StepFailure> {
    let state = build_state(config, Repositories::sql(pool))
        .map_err(|error| ("integration_setup", error.to_string(), exit::EXECUTION))?;
    run_sweep(&state, Utc::now())
        .await
        .map_err(|error| ("reminder_sweep", error.to_string(), exit::EXECUTION))
}
