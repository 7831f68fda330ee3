use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use runtime::{LogFeed, LogLevel};
use streaming::{
    ControllerConfig, LocalSource, LocalSourceConfig, RemoteSource, RemoteSourceConfig,
    ViewportController,
};
use tools::{parse_bounds, render_regions, render_snapshot, wait_until_settled};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Query the incinerator viewport loader")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load one viewport the way the map does
    Query {
        /// Bounds as north,south,east,west or a region name
        #[arg(long, allow_hyphen_values = true)]
        bounds: String,

        #[arg(long, default_value_t = 11.0)]
        zoom: f64,

        /// Proxy origin; switches to the remote API before loading
        #[arg(long)]
        remote: Option<String>,

        /// Seed for the simulated latency and failures
        #[arg(long)]
        seed: Option<u64>,

        /// Disable simulated latency and failures
        #[arg(long)]
        instant: bool,

        /// Print the loaded records as JSON
        #[arg(long)]
        json: bool,

        /// Print the loader's event history afterwards
        #[arg(long)]
        history: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },

    /// List the static regions
    Regions,

    /// Test whether the remote API answers through the proxy
    Ping {
        /// Proxy origin, e.g. http://127.0.0.1:3001
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Regions => {
            print!("{}", render_regions());
            Ok(())
        }
        Command::Ping { url } => {
            let source = RemoteSource::new(RemoteSourceConfig::new(url.clone()));
            if source.test_connection().await {
                println!("{url}: reachable");
                Ok(())
            } else {
                bail!("{url}: not reachable");
            }
        }
        Command::Query {
            bounds,
            zoom,
            remote,
            seed,
            instant,
            json,
            history,
            wait_secs,
        } => {
            let bounds = parse_bounds(&bounds).context("invalid --bounds")?;
            let mut local_config = if instant {
                LocalSourceConfig::instant()
            } else {
                LocalSourceConfig::default()
            };
            local_config.seed = seed;

            let feed = Arc::new(LogFeed::default());
            let local = Arc::new(LocalSource::bundled(local_config));
            let mut builder = ViewportController::builder(local)
                .config(ControllerConfig {
                    prefetch_enabled: false,
                    ..ControllerConfig::default()
                })
                .log_feed(feed.clone());
            if let Some(url) = &remote {
                builder = builder.remote(Arc::new(RemoteSource::new(RemoteSourceConfig::new(
                    url.clone(),
                ))));
            }
            let controller = builder.build();

            if remote.is_some() && !controller.switch_to_remote_api().await {
                info!("staying on local data");
            }
            controller.update_viewport(bounds, zoom).await;
            let snap = wait_until_settled(&controller, Duration::from_secs(wait_secs)).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&snap.incinerators)?);
            } else {
                print!("{}", render_snapshot(&snap));
            }
            if history {
                for entry in feed.entries_at_least(LogLevel::Debug) {
                    eprintln!(
                        "#{:<4} {:<5} {:<22} {}",
                        entry.seq, entry.level, entry.operation, entry.message
                    );
                }
            }
            if let Some(err) = snap.error {
                bail!("{err}");
            }
            Ok(())
        }
    }
}
