use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use config::{Config, File as ConfigFile};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use peerdex_directory::{Directory, IndexServer};
use peerdex_protocol::DEFAULT_INDEX_PORT;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod version;

use version::{git_commit_hash, PEERDEX_VERSION};

const DEFAULT_CONFIG_PATH: &str = "config/index.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct IndexConfig {
    host: String,
    port: u16,
    max_entries: Option<usize>,
    log_level: String,
    log_format: String,
    metrics_addr: Option<String>,
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_INDEX_PORT,
            max_entries: None,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_addr: None,
            config_path: None,
        }
    }
}

impl IndexConfig {
    fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = match config_path_override {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    anyhow::bail!(
                        "Configuration file {} not found (specified via --config)",
                        path.display()
                    );
                }
                Some(path)
            }
            None => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|path| path.exists()),
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("PEERDEX"));

        let mut config: IndexConfig = builder
            .build()?
            .try_deserialize()
            .context("invalid index configuration")?;
        config.config_path = resolved_path;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.host.parse::<IpAddr>().is_err() {
            anyhow::bail!("host must be an IP address, got {}", self.host);
        }
        if self.max_entries == Some(0) {
            anyhow::bail!("max_entries must be greater than zero when set");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("log_format must be pretty or json, got {}", self.log_format);
        }
        if let Some(addr) = &self.metrics_addr {
            addr.parse::<SocketAddr>()
                .with_context(|| format!("metrics_addr {addr} is not a socket address"))?;
        }
        Ok(())
    }

    fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("host {} is not an IP address", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<IndexConfig> {
    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = IndexConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut IndexConfig) {
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }

    if let Some(host) = matches.get_one::<String>("host") {
        config.host = host.clone();
    }

    if let Some(max_entries) = matches.get_one::<usize>("max-entries") {
        config.max_entries = Some(*max_entries);
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(metrics_addr) = matches.get_one::<String>("metrics-addr") {
        config.metrics_addr = Some(metrics_addr.clone());
    }
}

fn cli() -> Command {
    Command::new("peerdex-index")
        .version(PEERDEX_VERSION)
        .about("Peerdex index server")
        .disable_version_flag(true)
        .arg(
            Arg::new("port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("UDP port to listen on (default 15000)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Address to bind the control socket to"),
        )
        .arg(
            Arg::new("max-entries")
                .long("max-entries")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .help("Refuse registrations beyond this many entries"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format"),
        )
        .arg(
            Arg::new("metrics-addr")
                .long("metrics-addr")
                .value_name("ADDR")
                .help("Serve Prometheus metrics on this address"),
        )
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print detailed version information and exit"),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    if matches.get_flag("version_flag") {
        println!("peerdex-index {} (commit {})", PEERDEX_VERSION, git_commit_hash());
        return Ok(());
    }

    let config = load_config_with_overrides(&matches)?;
    init_logging(&config)?;
    init_metrics(&config)?;

    info!("Starting peerdex index server {}", PEERDEX_VERSION);
    match &config.config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("Config file: (built-in defaults)"),
    }
    if let Some(limit) = config.max_entries {
        info!("Directory limited to {} entries", limit);
    }

    let listen_addr = config.listen_addr()?;
    let directory = Directory::with_limit(config.max_entries);
    let server = IndexServer::bind(listen_addr, directory)
        .await
        .with_context(|| format!("failed to bind UDP socket on {listen_addr}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    match server_task.await {
        Ok(result) => result?,
        Err(e) => warn!("Index server task failed: {}", e),
    }

    info!("Peerdex index server shutdown complete");
    Ok(())
}

fn init_metrics(config: &IndexConfig) -> Result<()> {
    let Some(addr) = &config.metrics_addr else {
        info!("Prometheus metrics exporter disabled via configuration");
        return Ok(());
    };
    let addr: SocketAddr = addr.parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus metrics exporter")?;
    info!("Prometheus metrics exporter listening on {}", addr);

    describe_counter!(
        "peerdex_index_requests_total",
        "Control requests handled by the index server, by kind and outcome"
    );
    describe_gauge!(
        "peerdex_index_entries",
        "Number of replicas currently registered"
    );
    Ok(())
}

fn init_logging(config: &IndexConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(log_layer(&config.log_format, std::io::stdout))
        .init();

    Ok(())
}

/// One JSON object per event for `json`, human readable output otherwise.
fn log_layer<S, W>(format: &str, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    if format == "json" {
        layer.json().boxed()
    } else {
        layer.pretty().boxed()
    }
}
