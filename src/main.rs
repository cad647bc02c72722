use std::process::ExitCode;

fn main() -> ExitCode {
    match vaultmind_lib::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("vaultmind: {e}");
            ExitCode::FAILURE
        }
    }
}
