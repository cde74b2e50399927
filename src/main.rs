use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use beacon_runtime::registry::Provider;
use beacon_runtime::{Config, Runtime};

/// Beacon Runtime - plugin runtime for the Beacon voice gateway
#[derive(Parser)]
#[command(name = "beacon-runtime", version, about)]
struct Cli {
    /// Path to the runtime config file
    #[arg(short, long, env = "BEACON_RUNTIME_CONFIG")]
    config: Option<PathBuf>,

    /// Operator API port (overrides config)
    #[arg(long)]
    api_port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the runtime until interrupted (default)
    Run,
    /// Load and validate the configuration, then print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match cli.verbose {
            0 => "info,beacon_runtime=info",
            1 => "info,beacon_runtime=debug",
            2 => "debug",
            _ => "trace",
        })
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.api_port {
        config.api.port = port;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => check_config(&config),
        Command::Run => {
            tracing::info!(
                providers = config.providers.len(),
                plugins = config.plugins.len(),
                start = config.ports.start,
                end = config.ports.end,
                "starting beacon runtime"
            );

            let runtime = Runtime::new(config)?;
            runtime.run_until(shutdown_signal()).await?;
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c"),
    }
}

/// Decode every provider and print what would be started
fn check_config(config: &Config) -> anyhow::Result<()> {
    println!(
        "ports:     {}-{} on {}",
        config.ports.start, config.ports.end, config.ports.host
    );
    println!(
        "health:    every {:?}, threshold {}, auto-recover {}",
        config.health.interval, config.health.failure_threshold, config.health.auto_recover
    );
    if config.api.enabled {
        println!("api:       port {}", config.api.port);
    } else {
        println!("api:       disabled");
    }

    println!("providers: {}", config.providers.len());
    for entry in &config.providers {
        let provider = Provider::from_config(entry)?;
        let categories: Vec<String> = provider
            .categories()
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "  {:<20} {:<12} [{}]",
            provider.id,
            if provider.is_self_hosted() { "self-hosted" } else { "catalog" },
            categories.join(", ")
        );
    }

    println!("plugins:   {}", config.plugins.len());
    for plugin in &config.plugins {
        println!("  {:<20} {}", plugin.id, plugin.address);
    }

    println!("\nconfiguration ok");
    Ok(())
}
