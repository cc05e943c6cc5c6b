use crate::scan::{run_districts_list, run_districts_sync, run_scan, DistrictsSyncArgs, ScanArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use vaccine_slots::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "vaccine-slots",
    about = "Scan vaccination slot availability by district from the command line or over HTTP",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one availability scan and print the ranked slots
    Scan(ScanArgs),
    /// Maintain the district name lookup table
    Districts {
        #[command(subcommand)]
        command: DistrictsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DistrictsCommand {
    /// Rebuild the district table from the upstream state listings
    Sync(DistrictsSyncArgs),
    /// Print the stored district table
    List,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Scan(args) => run_scan(args).await,
        Command::Districts {
            command: DistrictsCommand::Sync(args),
        } => run_districts_sync(args).await,
        Command::Districts {
            command: DistrictsCommand::List,
        } => run_districts_list(),
    }
}
