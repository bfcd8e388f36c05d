use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use strata_config::{Config, Options};
use strata_source::{EnvSource, FileSource};
use strata_types::Value;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "strata", version, about = "strata — live multi-source configuration")]
struct Cli {
    /// Configuration file or directory; repeat to layer, later wins.
    #[arg(short, long = "file", value_name = "PATH", global = true)]
    files: Vec<PathBuf>,
    /// Environment variable prefix (e.g. `APP_`); applied after files.
    #[arg(short, long = "env", value_name = "PREFIX", global = true)]
    env: Vec<String>,
    /// Turn substituted placeholders into booleans and numbers when they parse.
    #[arg(long, global = true)]
    actual_types: bool,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the merged, resolved configuration.
    Dump,
    /// Print the value at a dotted key.
    Get {
        /// Dotted key, e.g. `listen.port`.
        key: String,
    },
    /// Print keys whenever they change, until Ctrl-C.
    Watch {
        /// Dotted keys to observe.
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let config = build(&cli).await?;
    let outcome = match &cli.command {
        Commands::Dump => cmd_dump(&config),
        Commands::Get { key } => cmd_get(&config, key),
        Commands::Watch { keys } => cmd_watch(&config, keys).await,
    };
    config.close().await.context("failed to stop sources")?;
    outcome
}

fn init_logging(json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if json {
        registry
            .with(fmt.json())
            .try_init()
            .context("failed to initialise JSON logging")?;
    } else {
        registry
            .with(fmt)
            .try_init()
            .context("failed to initialise logging")?;
    }
    Ok(())
}

async fn build(cli: &Cli) -> Result<Config> {
    let mut options = Options::new().with_resolve_actual_types(cli.actual_types);
    for path in &cli.files {
        options = options.with_source(Arc::new(FileSource::new(path)));
    }
    if !cli.env.is_empty() {
        options = options.with_source(Arc::new(EnvSource::new(cli.env.iter().cloned())));
    }

    let config = Config::new(options);
    config.load().await.context("failed to load configuration")?;
    tracing::debug!(files = cli.files.len(), env = cli.env.len(), "configuration loaded");
    Ok(config)
}

fn cmd_dump(config: &Config) -> Result<()> {
    let tree: serde_json::Value = config.scan_as().context("failed to read configuration")?;
    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}

fn cmd_get(config: &Config, key: &str) -> Result<()> {
    let value = config.value(key);
    let payload = value
        .load()
        .with_context(|| format!("key not found: {key}"))?;
    println!("{}", render(&payload));
    Ok(())
}

async fn cmd_watch(config: &Config, keys: &[String]) -> Result<()> {
    for key in keys {
        if let Some(payload) = config.value(key).load() {
            println!("{key} = {}", render(&payload));
        }
        config
            .watch(key, |key: &str, value: &Value| {
                if let Some(payload) = value.load() {
                    println!("{key} = {}", render(&payload));
                }
            })
            .with_context(|| format!("cannot watch {key}"))?;
    }
    tracing::info!(keys = keys.len(), "watching; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    Ok(())
}

/// Strings print bare; everything else as compact JSON.
fn render(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
