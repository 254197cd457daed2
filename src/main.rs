//! replup utility - main entrypoint
// (c) 2025 Ross Younger

fn main() -> std::process::ExitCode {
    match replup::cli() {
        Ok(true) => std::process::ExitCode::SUCCESS,
        Ok(false) => std::process::ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
