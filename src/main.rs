//! cfddns - Cloudflare dynamic DNS updater.

use anyhow::Context;
use cfddns::cloudflare::CloudflareClient;
use cfddns::config::Config;
use cfddns::probe::InterfaceProbe;
use cfddns::updater::{RunOutcome, Updater};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Publishes the public address of a network interface as a Cloudflare DNS
/// record. Intended to be scheduled as a recurring job.
#[derive(Parser)]
#[command(name = "cfddns")]
#[command(about = "Cloudflare dynamic DNS updater driven by interface addresses")]
#[command(version)]
struct Cli {
    /// Path to config file (JSON, or TOML when it ends in .toml)
    #[arg(short = 'f', long)]
    config: PathBuf,

    /// Check Cloudflare even if the address matches the cached one
    #[arg(long)]
    force: bool,

    /// Log debug information
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tracing::info!("========= Starting Cloudflare DDNS update =========");

    let mut updater = match prepare(&cli) {
        Ok(updater) => updater,
        Err(e) => {
            tracing::error!("{:#}", e);
            return failed();
        }
    };

    match updater.run(cli.force).await {
        Ok(RunOutcome::NoChange) => {
            tracing::info!("========= Cloudflare DDNS update completed (no action) =========");
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Reconciled(outcome)) => {
            tracing::info!(
                "========= Cloudflare DDNS update completed successfully ({:?}) =========",
                outcome
            );
            ExitCode::SUCCESS
        }
        // Logged by the updater together with the failed stage.
        Err(_) => failed(),
    }
}

fn failed() -> ExitCode {
    tracing::error!("========= Cloudflare DDNS update failed =========");
    ExitCode::FAILURE
}

fn prepare(cli: &Cli) -> anyhow::Result<Updater> {
    let config_path = std::path::absolute(&cli.config)
        .with_context(|| format!("Could not resolve config path {}", cli.config.display()))?;
    tracing::info!("Using configuration file {}", config_path.display());

    let config = Config::load_from(&config_path).context("Error loading configuration")?;
    let client = CloudflareClient::new(config.api_token.clone())
        .context("Could not construct HTTP client")?;

    Ok(Updater::new(
        config,
        config_path,
        client,
        Box::new(InterfaceProbe::new()),
    ))
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["cfddns"]).is_err());
        assert!(Cli::try_parse_from(["cfddns", "--force"]).is_err());
    }

    #[test]
    fn test_prepare_reports_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let cli = Cli::try_parse_from(["cfddns", "-f", missing.to_str().unwrap()]).unwrap();

        let err = prepare(&cli).err().expect("prepare should fail");
        assert!(format!("{:#}", err).contains("Error loading configuration"));
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from(["cfddns", "-f", "home.json", "--force", "-v"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("home.json"));
        assert!(cli.force);
        assert!(cli.verbose);
    }
}
