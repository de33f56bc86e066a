//! havend: Haven receive-vault daemon
//!
//! Headless composition root for the core: unlocks (or creates) the vault
//! with a password read from stdin, starts the HTTPS receive server and
//! prints the pairing PIN and certificate fingerprint, then serves until
//! interrupted.

use std::io::{BufRead, Write};
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use haven_core::HavenConfig;
use havend::App;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "havend", version, about = "Haven encrypted receive vault")]
struct Cli {
    /// Path to haven.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "HAVEN_CONFIG",
        default_value = "~/.config/haven/haven.toml"
    )]
    config: PathBuf,

    /// Local IP addresses to embed in the serving certificate
    #[arg(long = "ip")]
    ips: Vec<IpAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "HAVEN_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "HAVEN_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "havend starting"
    );

    let config = load_config(&cli.config)?;
    let mut app = App::new(config);
    app.initialize().context("creating application directories")?;

    unlock(&mut app)?;

    let started = app
        .start_server(cli.ips.clone())
        .await
        .context("starting receive server")?;
    println!("Receive server listening on port {}", started.port);
    println!("Pairing PIN:             {}", started.pin);
    println!("Certificate fingerprint: {}", started.fingerprint);

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("interrupt received, shutting down");
    app.shutdown().await.context("shutting down")?;

    Ok(())
}

fn unlock(app: &mut App) -> Result<()> {
    let first_time = app.is_first_time_setup();
    let prompt = if first_time {
        "Create vault password: "
    } else {
        "Vault password: "
    };

    loop {
        print!("{prompt}");
        std::io::stdout().flush()?;

        let mut password = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut password)
            .context("reading password")?;
        let password = password.trim_end_matches(['\r', '\n']);

        let result = if first_time {
            app.create_password(password)
        } else {
            app.verify_password(password)
        };

        match result {
            Ok(()) => return Ok(()),
            Err(err) => warn!("unlock failed: {err}"),
        }
    }
}

fn load_config(path: &PathBuf) -> Result<HavenConfig> {
    let path = haven_core::config::expand_tilde(path);
    if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    } else {
        tracing::warn!("config file not found: {}  (using defaults)", path.display());
        Ok(HavenConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
