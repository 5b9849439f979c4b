use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use engine::space::{CriterionId, SegmentId};
use metrics_exporter_statsd::StatsdBuilder;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::commands::{CliError, RequestSpec};
use crate::config::{Config, LoggingConfig, MetricsConfig};

mod commands;
mod config;

#[derive(Parser)]
#[command(about = "Inspect and serve experiment spaces")]
struct Cli {
    #[arg(long, short, default_value = "divert.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Validate the configured space and print a summary
    Check,
    /// Divert a single synthetic request and print its flag values
    Divert(DivertArgs),
    /// Keep reloading the configured space until interrupted
    Watch,
}

#[derive(Args)]
struct DivertArgs {
    /// Diversion identifier as CRITERION=VALUE
    #[arg(long = "id", value_parser = parse_identifier)]
    identifiers: Vec<(CriterionId, String)>,

    /// Experiment id to force the request into
    #[arg(long = "force")]
    forced_ids: Vec<SegmentId>,

    /// Request time in milliseconds since the epoch
    #[arg(long)]
    time: Option<i64>,

    /// Request attribute as NAME=VALUE
    #[arg(long = "attr", value_parser = parse_attribute)]
    attributes: Vec<(String, String)>,
}

fn parse_identifier(raw: &str) -> Result<(CriterionId, String), String> {
    let (criterion, value) = parse_attribute(raw)?;
    let criterion = criterion
        .parse()
        .map_err(|_| format!("{criterion} is not a criterion id"))?;
    Ok((criterion, value))
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw}"))
}

fn init_logging(config: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(guard.is_some().then(|| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(config.prefix.as_str()))?;
    metrics::set_global_recorder(recorder).map_err(|_| CliError::RecorderInstalled)?;

    shared::metrics_defs::describe_all(engine::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(loader::metrics_defs::ALL_METRICS);
    Ok(())
}

async fn run(cli: Cli, config: Config) -> Result<(), CliError> {
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    match cli.command {
        CliCommand::Check => {
            println!("{}", commands::check(&config).await?);
        }
        CliCommand::Divert(args) => {
            let request = RequestSpec {
                identifiers: args.identifiers,
                forced_ids: args.forced_ids,
                request_time_msec: args.time,
                attributes: args.attributes,
            };
            println!("{}", commands::divert(&config, &request).await?);
        }
        CliCommand::Watch => commands::watch(&config).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}: {err}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    let _sentry = init_logging(&config.logging());

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "divert failed");
            ExitCode::FAILURE
        }
    }
}
