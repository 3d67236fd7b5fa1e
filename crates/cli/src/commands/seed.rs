use cabflow_db::{DemoDataset, SeedResult};

use crate::commands::{
    connect_and_migrate, exit, load_config, runtime, CommandResult, StepFailure,
};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_and_migrate(&config).await?;

        let loaded = DemoDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), exit::MIGRATION))?;
        let verification = DemoDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), exit::EXECUTION))?;

        let outcome: Result<SeedResult, StepFailure> = if verification.all_present {
            Ok(loaded)
        } else {
            let failed: Vec<&str> = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect();
            Err(("seed_verification", verification_message(&failed), exit::EXECUTION))
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(loaded) => CommandResult::success("seed", summary(&loaded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(loaded: &SeedResult) -> String {
    format!(
        "demo dataset loaded (password for every account: cabflow-demo):\n  \
         - accounts: {}\n  - routing rules: {}\n  - budgets: {}\n  \
         - directory overrides: {}\n  - requests: {}",
        loaded.accounts.join(", "),
        loaded.routing_rules,
        loaded.budgets,
        loaded.overrides,
        loaded.requests.join(", "),
    )
}

fn verification_message(failed: &[&str]) -> String {
    if failed.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["budget:Sales", "request:TX-261001-DEMO02"]),
            "seed verification failed for checks: budget:Sales, request:TX-261001-DEMO02"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "some seed data failed to load");
    }
}
