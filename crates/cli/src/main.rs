use std::process::ExitCode;

fn main() -> ExitCode {
    cabflow_cli::run()
}
