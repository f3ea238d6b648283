use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use scopekit_bootstrap::{AppConfig, CliArgs};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod orders;
mod scenario;
mod views;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// ScopeKit demo - a headless order-entry workflow
#[derive(Parser)]
#[command(name = "scopekit-demo")]
#[command(about = "ScopeKit demo - a headless order-entry workflow")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Navigation history limit (overrides config)
    #[arg(long)]
    history_limit: Option<usize>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the order-entry workflow
    Run,
    /// Validate configuration and service registrations, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
        history_limit: cli.history_limit,
    };

    // defaults -> YAML (if provided) -> env (APP__*) -> CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    scopekit_bootstrap::init_logging(config.logging.as_ref(), config.home_dir());

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_demo(config).await,
        Commands::Check => check_config(&config),
    }
}

async fn run_demo(config: AppConfig) -> Result<()> {
    tracing::info!(app = %config.app.name, "ScopeKit demo starting");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signals = tokio::spawn(async move {
        if let Err(e) = scopekit_bootstrap::wait_for_shutdown().await {
            tracing::error!(error = %e, "Signal handling failed");
            return;
        }
        on_signal.cancel();
    });

    let result = scenario::run(config.scopekit.clone(), cancel).await;
    signals.abort();
    let report = result?;

    tracing::info!(
        customer = %report.customer,
        lines = report.lines,
        total_cents = report.total_cents,
        confirmed = report.confirmed,
        "Order workflow finished"
    );
    println!("{report:#?}");
    Ok(())
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration…");
    let container = scenario::build_container();
    println!(
        "Configuration is valid ({} services registered)",
        container.registered_count()
    );
    println!("{}", config.to_yaml()?);
    Ok(())
}
