use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use clap::{ArgAction, Parser, ValueEnum};
use epgsync_catalog::{Credentials, HttpCatalog};
use epgsync_feed::{read_events, FeedKind};
use epgsync_import::{ImportError, ImportReport, Importer, RunContext, RunSettings};
use epgsync_normalize::StationTables;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "epgsync", version, about = "Import an EPG feed into the video catalog")]
struct Cli {
    /// Catalog channel id whose primary stream the slots are scheduled on
    channel: String,

    /// Service name used for per-station overrides
    #[arg(long = "station", default_value = "skjarinn")]
    station: String,

    /// Feed variant
    #[arg(long = "feed-type", default_value = "skjarinn")]
    feed_type: String,

    /// Debug logging
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    verbose: bool,

    /// Force an update on every video even when nothing changed
    #[arg(long = "vodify", action = ArgAction::SetTrue)]
    vodify: bool,

    /// Events that started longer ago than this are skipped (at most ten years)
    #[arg(long = "max-age-hours", default_value_t = 24, value_parser = clap::value_parser!(u32).range(0..=87_600))]
    max_age_hours: u32,

    /// TOML file replacing the built-in station tables
    #[arg(long = "tables")]
    tables: Option<PathBuf>,

    /// Read the feed from a file instead of stdin
    #[arg(long = "input")]
    input: Option<PathBuf>,

    /// Catalog base URL
    #[arg(long = "api-url", env = "EPGSYNC_API_URL")]
    api_url: Option<String>,

    #[arg(long = "username", env = "EPGSYNC_USERNAME", hide_env_values = true)]
    username: Option<String>,

    #[arg(long = "password", env = "EPGSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
    output: Output,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

/// Failure classes, each with its own exit status.
#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error("configuration: {0:#}")]
    Config(anyhow::Error),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("{0:#}")]
    Runtime(anyhow::Error),
}

impl Failure {
    fn exit_code(&self) -> u8 {
        match self {
            Failure::Config(_) => 2,
            Failure::Import(ImportError::NoPrimaryStream { .. }) => 3,
            Failure::Import(_) | Failure::Runtime(_) => 1,
        }
    }
}

fn init_tracing(verbose: bool) {
    let env = if verbose {
        "debug".to_string()
    } else {
        std::env::var("EPGSYNC_LOG").unwrap_or_else(|_| "info".to_string())
    };
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("EPGSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid EPGSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

struct Config {
    settings: RunSettings,
    api_url: String,
    credentials: Credentials,
}

fn required(value: Option<String>, var: &str) -> anyhow::Result<String> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| anyhow!("{} is not set", var))
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let feed = FeedKind::from_str(&cli.feed_type)?;
    let tables = match &cli.tables {
        Some(path) => StationTables::load(path)?,
        None => StationTables::default(),
    };
    let credentials = Credentials {
        username: required(cli.username.clone(), "EPGSYNC_USERNAME")?,
        password: required(cli.password.clone(), "EPGSYNC_PASSWORD")?,
    };
    let api_url = required(cli.api_url.clone(), "EPGSYNC_API_URL")?;

    let mut settings = RunSettings::new(cli.channel.clone(), cli.station.clone(), feed);
    settings.tables = tables;
    settings.max_age = chrono::Duration::hours(i64::from(cli.max_age_hours));
    settings.vodify = cli.vodify;
    Ok(Config { settings, api_url, credentials })
}

fn read_input(path: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match path {
        Some(p) => std::fs::read(p).with_context(|| format!("reading feed {}", p.display())),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).context("reading feed from stdin")?;
            Ok(buf)
        }
    }
}

async fn run(cli: &Cli) -> Result<ImportReport, Failure> {
    let config = load_config(cli).map_err(Failure::Config)?;
    let catalog = HttpCatalog::new(&config.api_url, config.credentials).map_err(|e| Failure::Config(e.into()))?;
    let bytes = read_input(cli.input.as_deref()).map_err(Failure::Config)?;
    let layout = config.settings.feed.layout();
    let events = read_events(&bytes, &layout).context("parsing feed").map_err(Failure::Runtime)?;
    info!(channel = %cli.channel, station = %cli.station, events = events.len(), "epgsync: feed loaded");

    let ctx = RunContext::resolve(&catalog, config.settings).await?;
    Ok(Importer::new(&catalog, &ctx).run(&events).await?)
}

fn print_report(report: &ImportReport, output: Output) -> anyhow::Result<()> {
    match output {
        Output::Human => print!("{}", report),
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    init_metrics();

    match run(&cli).await {
        Ok(report) => match print_report(&report, cli.output) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {:#}", e);
                ExitCode::from(1)
            }
        },
        Err(failure) => {
            error!(error = %failure, "epgsync failed");
            eprintln!("error: {}", failure);
            ExitCode::from(failure.exit_code())
        }
    }
}
