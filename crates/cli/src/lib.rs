pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cabflow",
    about = "Cabflow operator CLI",
    long_about = "Operate the taxi booking desk: preflight checks, migrations, demo data, \
                  logins and reminder sweeps.",
    after_help = "Examples:\n  cabflow doctor --json\n  \
                  cabflow account add --username priya --employee-id E4001 \
                  --role manager --password '...'\n  cabflow remind"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo accounts, routing rules, budgets and sample requests")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, integration wiring and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Manage portal login accounts")]
    Account(AccountCommand),
    #[command(about = "Run one reminder sweep over overdue pending requests")]
    Remind,
}

#[derive(Debug, Subcommand)]
enum AccountCommand {
    #[command(about = "Create a login or reset an existing one")]
    Add(AccountArgs),
}

#[derive(Debug, Args)]
struct AccountArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    employee_id: String,
    #[arg(long, default_value = "employee", help = "employee | manager | admin")]
    role: String,
    #[arg(long, env = "CABFLOW_ACCOUNT_PASSWORD", hide_env_values = true)]
    password: String,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Account(AccountCommand::Add(args)) => {
            commands::account::add(commands::account::NewAccount {
                username: args.username,
                employee_id: args.employee_id,
                role: args.role,
                password: args.password,
            })
        }
        Command::Remind => commands::remind::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
