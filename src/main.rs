use std::process::ExitCode;

#[actix_web::main]
async fn main() -> ExitCode {
    match tabingest_lib::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be initialised yet when configuration fails.
            eprintln!("tabingest: {}", e);
            ExitCode::FAILURE
        }
    }
}
