mod cli;
mod commands;
mod logging;

use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    logging::init_logging(cli.verbose);

    if let Err(err) = commands::dispatch(cli).await {
        error!(target = "wx", error = %err, "command failed");
        eprintln!("{}", err.user_message());
        std::process::exit(1);
    }
}
