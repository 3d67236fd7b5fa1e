use cabflow_server::bootstrap::build_state;
use cabflow_server::state::Repositories;

use crate::commands::{connect_and_migrate, exit, load_config, runtime, CommandResult};

/// Startup preflight: everything the server does before it binds a port.
pub fn run() -> CommandResult {
    let config = match load_config("start") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("start") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;
        let wired = build_state(&config, Repositories::sql(pool.clone()))
            .map(|_| ())
            .map_err(|error| ("integration_setup", error.to_string(), exit::EXECUTION));
        pool.close().await;
        wired
    });

    match result {
        Ok(()) => CommandResult::success(
            "start",
            format!(
                "preflight passed: api on {}:{}, health on {}:{}, \
                 sap={}, smtp={}, whatsapp={}, reminders={}",
                config.server.bind_address,
                config.server.port,
                config.server.bind_address,
                config.server.health_check_port,
                config.sap.enabled,
                config.smtp.enabled,
                config.whatsapp.enabled,
                config.reminders.enabled,
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("start", error_class, message, exit_code)
        }
    }
}
