//! iNaturalist client session - command line entry point
//!
//! Sends cached, rate-limited requests to the API and manages the local cache.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use inat_session::config::CacheBackendConfig;
use inat_session::{
    AccessToken, ApiRequest, ClientSession, DryRun, PaginationMethod, Paginator, SessionConfig,
    paths,
};

#[derive(Parser, Debug)]
#[command(name = "inat-session")]
#[command(about = "Cached, rate-limited client for the iNaturalist API")]
#[command(version)]
struct Cli {
    /// API base URL (defaults to INAT_API_BASE_URL or the public v1 API)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Access token sent as a Bearer header
    #[arg(long, env = "INAT_ACCESS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// SQLite cache file
    #[arg(long, global = true)]
    cache_file: Option<PathBuf>,

    /// Do not read or write the response cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Longest wait for rate budget, in seconds, before a request fails
    #[arg(long, default_value_t = inat_session::config::api::MAX_DELAY.as_secs(), global = true)]
    max_delay: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// GET a v1 endpoint and print the JSON response
    Get {
        /// Endpoint path, e.g. `observations` or `taxa/autocomplete`
        endpoint: String,

        /// Query parameters as key=value
        #[arg(value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Skip the cache and bypass the CDN cache
        #[arg(long)]
        refresh: bool,

        /// Log the request instead of sending it
        #[arg(long)]
        dry_run: bool,

        /// Fetch every page and print the combined results
        #[arg(long)]
        all: bool,

        /// Paginate by ID instead of page number (with --all)
        #[arg(long, requires = "all")]
        by_id: bool,

        /// Maximum results to fetch (with --all)
        #[arg(long, requires = "all")]
        limit: Option<usize>,
    },

    /// Remove cached responses
    ClearCache {
        /// Only remove expired responses
        #[arg(long)]
        expired: bool,
    },

    /// Print storage locations
    Paths,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let mut config = SessionConfig::from_env()?;
    if let Some(url) = &cli.base_url {
        config.base_url.clone_from(url);
    }
    if let Some(token) = &cli.token {
        config.credentials = Some(AccessToken::new(token.clone()));
    }
    if let Some(path) = &cli.cache_file {
        config.cache_backend = CacheBackendConfig::Sqlite { path: path.clone() };
    }
    if cli.no_cache {
        config.cache_enabled = false;
    }
    Ok(config.with_max_delay(Duration::from_secs(cli.max_delay)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), command = ?cli.command, "Starting");

    match &cli.command {
        Command::Paths => {
            println!("cache_dir:  {}", paths::cache_dir().display());
            println!("cache_file: {}", paths::cache_file().display());
        }
        Command::ClearCache { expired } => {
            let session = ClientSession::new(build_config(&cli)?)?;
            if *expired {
                let removed = session.remove_expired().await?;
                tracing::info!(removed, "Removed expired responses");
            } else {
                session.clear_cache().await?;
            }
        }
        Command::Get { endpoint, params, refresh, dry_run, all, by_id, limit } => {
            let mut config = build_config(&cli)?;
            if *dry_run {
                config.dry_run = DryRun::All;
            }
            let session = ClientSession::new(config)?;

            let mut request =
                ApiRequest::get(session.v1_url(endpoint)).params(params.iter().cloned());
            if *refresh {
                request = request.with_refresh_params(session.refresh_params(endpoint));
            }

            let output = if *all {
                let method = if *by_id { PaginationMethod::Id } else { PaginationMethod::Page };
                let mut paginator =
                    Paginator::<serde_json::Value>::new(session, request).method(method);
                if let Some(limit) = limit {
                    paginator = paginator.limit(*limit);
                }
                let results = paginator.all().await?;
                serde_json::json!({ "total_results": results.len(), "results": results })
            } else {
                let response = session.request(request).await?;
                tracing::debug!(from_cache = response.from_cache(), "Request complete");
                response.json()?
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
