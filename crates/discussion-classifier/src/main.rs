// discussion-classifier/src/main.rs

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use discussion_classifier::{config::Config, run_server, shared_state::SharedState};

#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "discussion-classifier", version, about = "Classify resolved support conversations")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[cfg(feature = "cli")]
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server and job workers (default).
    Serve,
    /// Process one conversation synchronously and print the job report.
    Process { conversation_id: String },
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(cfg).await,
        Command::Process { conversation_id } => {
            discussion_classifier::telemetry::init_tracing(&cfg.log_level);
            discussion_classifier::metrics::init_metrics()?;
            let state = SharedState::from_config(cfg)?;
            let report = state.processor.process_conversation(&conversation_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
