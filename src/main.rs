use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use a11y_relay::config::RelayConfig;
use a11y_relay::inspector::StdoutRenderer;
use a11y_relay::relay::TabId;
use a11y_relay::runtime::Runtime;
use a11y_relay::scenario::{Scenario, ScenarioRunner};

#[derive(Parser)]
#[command(
    name = "a11y-relay",
    about = "Relay accessibility events from a page to an inspector."
)]
struct Cli {
    /// Config file (defaults to .a11y-relay/config.yaml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a scenario and print every rendered event as a JSON line
    Replay {
        scenario: PathBuf,
        /// Tab id to run under (overrides the scenario's)
        #[arg(short, long)]
        tab: Option<u32>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("a11y_relay=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = RelayConfig::load(cli.config.as_deref()).context("loading config")?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
        Command::Replay { scenario, tab } => {
            let scenario = Scenario::load(&scenario)?;
            let tab = tab.map(TabId).unwrap_or(scenario.tab);

            let mut runtime = Runtime::start(config)?;
            let rendered = {
                let mut runner = ScenarioRunner::new(&mut runtime, Arc::new(StdoutRenderer), tab);
                runner.run(&scenario).await?;
                runner.finish().await?
            };
            runtime.shutdown().await;

            match rendered {
                Some(count) => info!(%tab, count, "replay finished"),
                None => info!(%tab, "replay finished without an inspector"),
            }
        }
    }

    Ok(())
}
