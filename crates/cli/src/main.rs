//! Peerdex peer agent
//!
//! Registers files from a shared directory with an index server, serves them
//! to other peers and downloads theirs, driven by an interactive prompt.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::{Config, File as ConfigFile};
use peerdex_agent::{AgentConfig, Console, IndexClient, PeerAgent, ServingOptions};
use peerdex_protocol::validate_peer_name;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::{info, warn, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_CONFIG_PATH: &str = "config/peer.toml";

#[derive(Parser, Debug)]
#[command(name = "peerdex-peer")]
#[command(about = "Peerdex interactive peer agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Index server host
    server_host: Option<String>,

    /// Index server UDP port
    server_port: Option<u16>,

    /// Peer name to register files under (prompted for when omitted)
    #[arg(long)]
    name: Option<String>,

    /// Directory holding served files and receiving downloads
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the log level
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log output format (pretty or json)
    #[arg(long, value_name = "FORMAT", value_parser = ["pretty", "json"])]
    log_format: Option<String>,
}

fn load_config(path_override: Option<&PathBuf>) -> Result<AgentConfig> {
    let resolved_path = match path_override {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path.clone())
        }
        None => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|path| path.exists()),
    };

    let mut builder = Config::builder();
    if let Some(path) = &resolved_path {
        builder = builder.add_source(ConfigFile::from(path.as_path()));
    }
    builder = builder.add_source(config::Environment::with_prefix("PEERDEX"));

    builder
        .build()?
        .try_deserialize()
        .context("invalid peer configuration")
}

fn apply_overrides(cli: &Cli, config: &mut AgentConfig) {
    if let Some(host) = &cli.server_host {
        config.server_host = host.clone();
    }
    if let Some(port) = cli.server_port {
        config.server_port = port;
    }
    if let Some(name) = &cli.name {
        config.peer_name = Some(name.clone());
    }
    if let Some(dir) = &cli.dir {
        config.shared_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }
}

fn load_config_with_overrides(cli: &Cli) -> Result<AgentConfig> {
    let mut config = load_config(cli.config.as_ref())?;
    apply_overrides(cli, &mut config);
    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}

/// Logs go to stderr so they never interleave with prompts on stdout.
fn init_logging(config: &AgentConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(log_layer(&config.log_format, std::io::stderr))
        .init();

    Ok(())
}

fn log_layer<S, W>(format: &str, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    if format == "json" {
        layer.json().boxed()
    } else {
        layer.compact().boxed()
    }
}

/// Ask until a valid peer name is entered; `None` at end of input.
async fn prompt_peer_name<R, W>(console: &mut Console<R, W>) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(name) = console.prompt("Enter your peer name: ").await? else {
            return Ok(None);
        };
        match validate_peer_name(&name) {
            Ok(()) => return Ok(Some(name)),
            Err(e) => eprintln!("Invalid peer name: {e}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config_with_overrides(&cli)?;
    init_logging(&config)?;

    if !config.shared_dir.is_dir() {
        anyhow::bail!(
            "Shared directory {} does not exist",
            config.shared_dir.display()
        );
    }

    let client = IndexClient::connect(&config.server_host, config.server_port)
        .await
        .with_context(|| {
            format!(
                "failed to set up index client for {}:{}",
                config.server_host, config.server_port
            )
        })?;
    info!("Using index server at {}", client.server_addr());

    let mut console = Console::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());

    let name = match config.peer_name.clone() {
        Some(name) => name,
        None => match prompt_peer_name(&mut console).await? {
            Some(name) => name,
            None => return Ok(()),
        },
    };

    let options = ServingOptions::from_config(&config).map_err(|e| anyhow!(e))?;
    let agent = PeerAgent::new(name, client, options)?;
    info!(
        "Peer {} sharing {}",
        agent.name(),
        agent.shared_dir().display()
    );

    tokio::select! {
        result = console.run(&agent) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received shutdown signal");
            for (filename, e) in agent.shutdown().await {
                warn!("Could not deregister {}: {}", filename, e);
            }
        }
    }

    info!("Peer {} exited", agent.name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn positional_server_address_overrides_defaults() {
        let cli = Cli::try_parse_from(["peerdex-peer", "10.0.0.5", "16000", "--name", "alice"])
            .unwrap();
        let mut config = AgentConfig::default();
        apply_overrides(&cli, &mut config);

        assert_eq!(config.server_host, "10.0.0.5");
        assert_eq!(config.server_port, 16_000);
        assert_eq!(config.peer_name.as_deref(), Some("alice"));
        config.validate().unwrap();
    }

    #[test]
    fn config_file_is_read_before_cli_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "server_host = \"192.168.1.2\"\nserver_port = 15500\npeer_name = \"bob\""
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "peerdex-peer",
            "--config",
            file.path().to_str().unwrap(),
            "--name",
            "carol",
        ])
        .unwrap();
        let config = load_config_with_overrides(&cli).unwrap();

        assert_eq!(config.server_host, "192.168.1.2");
        assert_eq!(config.server_port, 15_500);
        assert_eq!(config.peer_name.as_deref(), Some("carol"));
    }

    #[test]
    fn json_log_format_writes_json_lines() {
        let captured = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = captured.clone();
        let writer = move || SharedBuf(sink.clone());
        let subscriber = tracing_subscriber::registry().with(log_layer("json", writer));
        tracing::subscriber::with_default(subscriber, || warn!("Could not deregister a.txt"));

        let output = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        assert!(output.starts_with('{'), "{output}");
        assert!(output.contains("\"level\":\"WARN\""), "{output}");
    }

    struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn peer_name_prompt_retries_until_valid() {
        let input = b"\nalice\n";
        let mut console = Console::new(&input[..], Vec::new());
        let name = prompt_peer_name(&mut console).await.unwrap();
        assert_eq!(name.as_deref(), Some("alice"));

        let mut console = Console::new(&b""[..], Vec::new());
        assert_eq!(prompt_peer_name(&mut console).await.unwrap(), None);
    }
}
