use crate::demo::{run_demo, run_sweep, DemoArgs, SweepArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use tradematch::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "tradematch-api",
    about = "Run the job dispatch service or exercise it from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service and the sweep scheduler (default command)
    Serve(ServeArgs),
    /// Run one auto-approval sweep over the demo roster and print the report
    Sweep(SweepArgs),
    /// Walk through request, review, assignment, completion and a sweep
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the sweep cadence in seconds (0 disables the scheduler)
    #[arg(long)]
    pub(crate) sweep_interval_secs: Option<u64>,
    /// Load the demo roster into the in-memory store before serving
    #[arg(long)]
    pub(crate) seed_demo: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep(args) => run_sweep(args),
        Command::Demo(args) => run_demo(args),
    }
}
