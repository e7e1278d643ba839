use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use pktbench::config::Config;
use pktbench::{report, testcase};

#[derive(Parser)]
#[command(
    name = "pktbench",
    about = "Adaptive throughput and latency characterization of dataplane systems",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file
    #[arg(short = 'f', long, global = true, default_value = "pktbench.toml")]
    config: PathBuf,

    /// Verbose output (debug-level logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test cases against the configured peers and generate a report
    Run {
        /// Directory containing the generator profiles
        #[arg(short = 'd', long)]
        profiles_dir: Option<PathBuf>,

        /// Where to write the report (a timestamped directory by default)
        #[arg(short, long)]
        report_dir: Option<PathBuf>,

        /// Test names to execute (all tests by default)
        tests: Vec<String>,
    },

    /// List the available test cases
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
            }),
        )
        .init();

    match cli.command {
        Commands::List => {
            for (name, entry) in testcase::builtin().iter() {
                println!("{name:<16} {}", entry.summary);
            }
        }

        Commands::Run {
            profiles_dir,
            report_dir,
            tests,
        } => {
            tracing::info!("pktbench version {}", env!("CARGO_PKG_VERSION"));

            let mut config = Config::load(&cli.config)?;
            if let Some(dir) = profiles_dir {
                config.general.profiles_dir = dir;
            }
            let report_dir = report_dir.unwrap_or_else(|| {
                PathBuf::from(
                    chrono::Local::now()
                        .format("pktbench-report-%Y%m%d_%H%M%S")
                        .to_string(),
                )
            });

            let cancel = CancellationToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, aborting the run");
                    signal_token.cancel();
                }
            });

            let summary = pktbench::run_suite(&config, &tests, cancel).await?;
            let paths = report::write(&summary, &report_dir)?;
            tracing::info!(report = %paths.markdown.display(), "report generated");
        }
    }

    Ok(())
}
