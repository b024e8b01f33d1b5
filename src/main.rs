use clap::Parser;
use suiterun::cli::{self, Commands};
use suiterun::logging;

#[derive(Parser)]
#[command(name = "suiterun", about = "Run HTTP API test suites against an environment")]
#[command(version, long_about = None)]
struct Cli {
    /// Debug-level engine logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    match cli::dispatch(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}
