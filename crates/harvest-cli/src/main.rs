mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    // Logging is set up inside once the state directory is known.
    if let Err(err) = Cli::run_from_args().await {
        eprintln!("harvest error: {:#}", err);
        std::process::exit(1);
    }
}
