use crate::demo::{run_demo, run_explain, DemoArgs, ExplainArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use risk_lens::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Risk Lens",
    about = "Run and demonstrate the credit application workflow and decision explainer",
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
    /// Walk a sample application through enrichment, submission and history replay
    Demo(DemoArgs),
    /// Render the explanation for a saved decision payload
    Explain(ExplainArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Serve against the in-process demo credit service instead of RISK_API_URL
    #[arg(long)]
    pub(crate) demo: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Explain(args) => run_explain(args),
    }
}
