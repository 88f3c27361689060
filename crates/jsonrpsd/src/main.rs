use std::process::ExitCode;

fn main() -> ExitCode {
    match jsonrpsd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("jsonrpsd: {error}");
            ExitCode::FAILURE
        }
    }
}
