use crate::shutdown::ShutdownConfig;
use crate::store::StoreLocation;
use crate::webhook::signature::{DEFAULT_TOLERANCE_SECS, WebhookSecret};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

const DEFAULT_DATABASE_URL: &str = "redb://data/users.redb";
const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub webhook_secret: WebhookSecret,
    pub store_location: StoreLocation,
    pub http_bind_address: SocketAddr,
    pub signature_tolerance_secs: u64,
    pub max_webhook_body_bytes: usize,
    pub graceful_shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Config with defaults for everything but the secret and the store.
    pub fn new(webhook_secret: WebhookSecret, store_location: StoreLocation) -> Self {
        Self {
            webhook_secret,
            store_location,
            http_bind_address: SocketAddr::new(DEFAULT_HOST, DEFAULT_PORT),
            signature_tolerance_secs: DEFAULT_TOLERANCE_SECS,
            max_webhook_body_bytes: DEFAULT_MAX_WEBHOOK_BODY_BYTES,
            graceful_shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            webhook_secret: cli_webhook_secret,
            database_url: cli_database_url,
            host: cli_host,
            port: cli_port,
            signature_tolerance_secs: cli_tolerance,
            max_webhook_body_bytes: cli_max_body,
            graceful_shutdown_timeout_secs: cli_shutdown_timeout,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            webhook_secret: file_webhook_secret,
            database_url: file_database_url,
            host: file_host,
            port: file_port,
            signature_tolerance_secs: file_tolerance,
            max_webhook_body_bytes: file_max_body,
            graceful_shutdown_timeout_secs: file_shutdown_timeout,
        } = file_config;

        let raw_secret = cli_webhook_secret
            .or(file_webhook_secret)
            .filter(|secret| !secret.trim().is_empty())
            .context("webhook secret is required (set CLERK_WEBHOOK_SECRET or --webhook-secret)")?;
        let webhook_secret =
            WebhookSecret::parse(&raw_secret).context("invalid webhook secret")?;

        let database_url = cli_database_url
            .or(file_database_url)
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let store_location = database_url
            .parse::<StoreLocation>()
            .with_context(|| format!("invalid database url {database_url:?}"))?;

        let host = cli_host.or(file_host).unwrap_or(DEFAULT_HOST);
        let port = cli_port.or(file_port).unwrap_or(DEFAULT_PORT);

        Ok(Self {
            webhook_secret,
            store_location,
            http_bind_address: SocketAddr::new(host, port),
            signature_tolerance_secs: cli_tolerance
                .or(file_tolerance)
                .unwrap_or(DEFAULT_TOLERANCE_SECS),
            max_webhook_body_bytes: cli_max_body
                .or(file_max_body)
                .unwrap_or(DEFAULT_MAX_WEBHOOK_BODY_BYTES),
            graceful_shutdown_timeout_secs: cli_shutdown_timeout
                .or(file_shutdown_timeout)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        })
    }

    /// Shutdown timing: the configured timeout bounds draining of in-flight
    /// deliveries; handlers keep their own deadline.
    pub fn shutdown_config(&self) -> ShutdownConfig {
        ShutdownConfig::default().with_in_flight_timeout(self.graceful_shutdown_timeout_secs)
    }

    /// Reject configurations that cannot serve deliveries.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.signature_tolerance_secs > 0,
            "signature tolerance must be at least one second"
        );
        anyhow::ensure!(
            self.max_webhook_body_bytes >= 1024,
            "webhook body limit of {} bytes is too small for provider payloads",
            self.max_webhook_body_bytes
        );
        anyhow::ensure!(
            self.graceful_shutdown_timeout_secs > 0,
            "graceful shutdown timeout must be at least one second"
        );
        Ok(())
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "hotel-booking-api",
    about = "Hotel booking API: user sync webhook server",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "CLERK_WEBHOOK_SECRET",
        hide_env_values = true,
        value_name = "SECRET",
        help = "Webhook signing secret (whsec_...)"
    )]
    pub webhook_secret: Option<String>,

    #[arg(
        long,
        env = "DATABASE_URL",
        value_name = "URL",
        help = "User store location: memory://, redb://<path> or a file path"
    )]
    pub database_url: Option<String>,

    #[arg(long, env = "HOST", value_name = "ADDR", help = "Interface to listen on")]
    pub host: Option<IpAddr>,

    #[arg(
        long,
        env = "PORT",
        value_name = "PORT",
        help = "Port to listen on",
        value_parser = clap::value_parser!(u16)
    )]
    pub port: Option<u16>,

    #[arg(
        long,
        env = "WEBHOOK_SIGNATURE_TOLERANCE_SECS",
        value_name = "SECS",
        help = "Accepted clock skew for webhook timestamps"
    )]
    pub signature_tolerance_secs: Option<u64>,

    #[arg(
        long,
        env = "WEBHOOK_MAX_BODY_BYTES",
        value_name = "BYTES",
        help = "Largest webhook body accepted"
    )]
    pub max_webhook_body_bytes: Option<usize>,

    #[arg(
        long,
        env = "GRACEFUL_SHUTDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Time allowed for in-flight deliveries to finish after a stop signal"
    )]
    pub graceful_shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    webhook_secret: Option<String>,
    database_url: Option<String>,
    host: Option<IpAddr>,
    port: Option<u16>,
    signature_tolerance_secs: Option<u64>,
    max_webhook_body_bytes: Option<usize>,
    graceful_shutdown_timeout_secs: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
