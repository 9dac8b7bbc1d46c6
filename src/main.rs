//! tiercache admin CLI
//!
//! Inspects and maintains a durable (L3) cache directory.
//!
//! ```text
//! tiercache --cache-dir /var/cache/tiercache stats
//! tiercache --cache-dir /var/cache/tiercache list team_game_log
//! tiercache --cache-dir /var/cache/tiercache invalidate team_game_log --param team=Lakers
//! tiercache --cache-dir /var/cache/tiercache evict --max-size-mb 256
//! ```
//!
//! Results go to stdout as JSON; logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value as JsonValue};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::manifest::{RootConfig, ROOT_CONFIG_FILE};
use tiercache::{CacheSettings, DurableColumnarCache, Error, Params, PersistentTierConfig, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// tiercache - maintain a durable fetch cache directory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Durable cache directory (overrides the settings file)
    #[arg(long, env = "TIERCACHE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Settings file (YAML or JSON); its `persistent` section is used
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Usage per namespace
    Stats,
    /// Cached entries, most recently accessed first
    List {
        /// Limit to one namespace
        namespace: Option<String>,
    },
    /// Remove one entry (with --param) or a whole namespace
    Invalidate {
        namespace: String,
        /// Request parameter `key=value`; values are parsed as JSON when possible
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, JsonValue)>,
    },
    /// Evict least recently accessed entries until under the cap
    Evict {
        /// Cap to enforce instead of the configured one
        #[arg(long)]
        max_size_mb: Option<u64>,
    },
    /// Remove every cached entry
    Clear,
}

fn parse_param(raw: &str) -> std::result::Result<(String, JsonValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Ok((key.to_string(), value))
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let cache = open_cache(&args).await?;
    info!(root = %cache.root().display(), "Opened cache directory");

    let output = match &args.command {
        Command::Stats => serde_json::to_value(cache.stats().await?)?,
        Command::List { namespace } => {
            let namespaces = match namespace {
                Some(ns) => vec![ns.clone()],
                None => cache.namespaces().await?,
            };
            let mut entries = Vec::new();
            for ns in namespaces {
                for (hash, entry) in cache.list(&ns).await? {
                    entries.push(json!({ "namespace": ns, "hash": hash, "entry": entry }));
                }
            }
            JsonValue::Array(entries)
        }
        Command::Invalidate { namespace, params } => {
            let params: Option<Params> =
                (!params.is_empty()).then(|| params.iter().cloned().collect());
            let removed = cache.invalidate(namespace, params.as_ref()).await?;
            json!({ "namespace": namespace, "removed": removed })
        }
        Command::Evict { max_size_mb } => {
            let report = match max_size_mb {
                Some(mb) => cache.evict_with_cap(mb.saturating_mul(1024 * 1024)).await?,
                None => cache.evict().await?,
            };
            serde_json::to_value(report)?
        }
        Command::Clear => json!({ "removed": cache.clear().await? }),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Resolve the directory and tier settings, preferring what is on disk
async fn open_cache(args: &Args) -> Result<DurableColumnarCache> {
    let configured = match &args.config {
        Some(path) => CacheSettings::from_file(path)?.persistent,
        None => None,
    };

    let mut config = match (args.cache_dir.clone(), configured.clone()) {
        (Some(dir), Some(mut config)) => {
            config.cache_dir = dir;
            config
        }
        (Some(dir), None) => PersistentTierConfig::new(dir),
        (None, Some(config)) => config,
        (None, None) => {
            return Err(Error::Config(
                "no cache directory; pass --cache-dir or a --config with a persistent section".into(),
            ))
        }
    };

    // Without a settings file keep the directory's own compression and cap
    if configured.is_none() {
        if let Some(root) = RootConfig::load(&config.cache_dir.join(ROOT_CONFIG_FILE)).await? {
            config.compression = root.compression;
            config.max_size_mb = root.max_size_mb;
        }
    }
    config.background_writes = false;

    DurableColumnarCache::open(&config).await
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},redis=warn")));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("team=Lakers").unwrap(), ("team".into(), json!("Lakers")));
        assert_eq!(parse_param("season=2023-24").unwrap(), ("season".into(), json!("2023-24")));
        assert_eq!(parse_param("year=2021").unwrap(), ("year".into(), json!(2021)));
        assert_eq!(parse_param("q=a=b").unwrap(), ("q".into(), json!("a=b")));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::try_parse_from([
            "tiercache",
            "--cache-dir",
            "/tmp/c",
            "invalidate",
            "team_game_log",
            "--param",
            "team=Lakers",
        ])
        .unwrap();
        assert_eq!(args.cache_dir, Some(PathBuf::from("/tmp/c")));
        match args.command {
            Command::Invalidate { namespace, params } => {
                assert_eq!(namespace, "team_game_log");
                assert_eq!(params, vec![("team".to_string(), json!("Lakers"))]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_cache_keeps_on_disk_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PersistentTierConfig::new(dir.path());
        config.compression = "zstd".into();
        config.max_size_mb = 7;
        DurableColumnarCache::open(&config).await.unwrap();

        let args = Args::try_parse_from([
            "tiercache",
            "--cache-dir",
            dir.path().to_str().unwrap(),
            "stats",
        ])
        .unwrap();
        let cache = open_cache(&args).await.unwrap();
        assert_eq!(cache.compression().name(), "zstd");
        assert_eq!(cache.max_size_bytes(), 7 * 1024 * 1024);
    }
}
