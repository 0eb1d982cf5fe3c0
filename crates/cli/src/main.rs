use std::process::ExitCode;

fn main() -> ExitCode {
    somnia_cli::run()
}
