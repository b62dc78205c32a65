use std::{path::PathBuf, process::ExitCode, time::Duration};

use bigdataserver::{
    chunk_cache::ChunkCacheCapacity,
    config::ServerConfig,
    dataset_list::{pair_arguments, read_dataset_list, validate_dataset_list},
    server::Server,
};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Serve multi-resolution volumetric image datasets over HTTP.
///
/// Datasets are given with a dataset list file (-d) and/or as NAME XML pairs.
#[derive(Parser, Debug)]
#[command(name = "bigdataserver", version, about)]
struct Args {
    /// Hostname of the server.
    #[arg(short = 's', long, value_name = "HOSTNAME", default_value = "localhost")]
    hostname: String,

    /// Listening port.
    #[arg(short = 'p', long, value_name = "PORT", default_value_t = 8080)]
    port: u16,

    /// Dataset list file, one "NAME<TAB>XML[<TAB>CATEGORY<TAB>DESCRIPTION<TAB>INDEX]" per line.
    #[arg(short = 'd', long, value_name = "FILE")]
    dataset_list: Option<PathBuf>,

    /// Directory to store thumbnails (a new temporary directory by default).
    #[arg(short = 't', long, value_name = "DIRECTORY")]
    thumbnails: Option<PathBuf>,

    /// Base URL of the server (http://HOSTNAME:PORT by default).
    #[arg(short = 'b', long, value_name = "BASEURL")]
    base_url: Option<String>,

    /// Enable the manager context.
    #[arg(short = 'm', long)]
    manager: bool,

    /// Chunk cache capacity of each dataset in cells.
    #[arg(long, value_name = "CELLS", conflicts_with = "cache_bytes")]
    cache_cells: Option<u64>,

    /// Chunk cache capacity of each dataset in bytes.
    #[arg(long, value_name = "BYTES")]
    cache_bytes: Option<u64>,

    /// Traffic sampling interval in seconds.
    #[arg(
        long,
        value_name = "SECONDS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    stats_interval: u64,

    /// Number of retained traffic samples.
    #[arg(long, value_name = "SAMPLES", default_value_t = 720)]
    stats_capacity: usize,

    /// Log as JSON.
    #[arg(long, env = "BIGDATASERVER_LOG_JSON")]
    log_json: bool,

    /// Additional NAME XML pairs.
    #[arg(value_name = "NAME XML")]
    datasets: Vec<String>,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let cache_capacity = match (self.cache_cells, self.cache_bytes) {
            (_, Some(bytes)) => ChunkCacheCapacity::Bytes(bytes),
            (Some(cells), None) => ChunkCacheCapacity::Chunks(cells),
            (None, None) => ChunkCacheCapacity::default(),
        };
        let mut config = ServerConfig::default();
        config
            .set_hostname(self.hostname.clone())
            .set_port(self.port)
            .set_base_url(self.base_url.clone())
            .set_thumbnails_dir(self.thumbnails.clone())
            .set_manager_enabled(self.manager)
            .set_cache_capacity(cache_capacity)
            .set_stats_interval(Duration::from_secs(self.stats_interval))
            .set_stats_capacity(self.stats_capacity);
        config
    }
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut datasets = match &args.dataset_list {
        Some(path) => read_dataset_list(path)?,
        None => Vec::new(),
    };
    datasets.extend(pair_arguments(&args.datasets)?);
    validate_dataset_list(&datasets)?;

    let server = Server::new(args.server_config())?;
    server.deploy_all(datasets)?;
    server.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_json);
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "bigdataserver failed");
            ExitCode::FAILURE
        }
    }
}
