//! storegate binary

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use storegate::common::{parse_duration, CacheBackendKind};
use storegate::{Config, GatewayServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "storegate")]
#[command(about = "Tiered cache and failure fallback in front of a document store")]
#[command(version)]
struct Cli {
    /// Config file (TOML); STOREGATE__* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Primary store base URL
        #[arg(long)]
        primary: Option<String>,

        /// Redis URL for the shared cache tier
        #[arg(long, conflicts_with = "memory_cache")]
        redis: Option<String>,

        /// Use the in-process shared cache instead of Redis
        #[arg(long)]
        memory_cache: bool,

        /// Health probe interval (e.g. 500ms, 5s)
        #[arg(long, value_parser = parse_duration)]
        probe_interval: Option<Duration>,
    },

    /// Load and validate the configuration, then print it
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            primary,
            redis,
            memory_cache,
            probe_interval,
        } => {
            // CLI has priority over file and environment
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            if let Some(primary) = primary {
                config.primary.base_url = primary;
            }
            if let Some(redis) = redis {
                config.cache.backend = CacheBackendKind::Redis;
                config.cache.redis_url = redis;
            }
            if memory_cache {
                config.cache.backend = CacheBackendKind::Memory;
            }
            if let Some(interval) = probe_interval {
                config.health.interval_ms = interval.as_millis() as u64;
            }
            config.validate()?;

            GatewayServer::new(config).serve().await?;
        }
        Commands::Check => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
