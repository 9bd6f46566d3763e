use clap::Parser;
use feed_merger::{OutputFormat, Pipeline, PipelineConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Fetch, merge, sanitize and filter a list of RSS/Atom feeds into one feed.
#[derive(Debug, Parser)]
#[command(name = "feed-merger", version, about)]
struct Args {
    /// File with one feed URL per line
    #[arg(long, env = "FEED_MERGER_FEEDS")]
    feeds: PathBuf,

    /// File with one exclusion keyword per line
    #[arg(long, env = "FEED_MERGER_KEYWORDS")]
    keywords: Option<PathBuf>,

    /// Where to write the merged document
    #[arg(long, env = "FEED_MERGER_OUTPUT")]
    output: PathBuf,

    #[arg(long, env = "FEED_MERGER_FORMAT", value_enum, default_value_t = OutputFormat::Rss)]
    format: OutputFormat,

    #[arg(long, env = "FEED_MERGER_USER_AGENT")]
    user_agent: Option<String>,

    #[arg(long, env = "FEED_MERGER_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Retries after a 429 before giving up on a source
    #[arg(long, env = "FEED_MERGER_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Minimum seconds between two requests to the same domain
    #[arg(long, env = "FEED_MERGER_DOMAIN_DELAY_SECS", default_value_t = 10)]
    domain_delay_secs: u64,

    /// Number of domains fetched in parallel
    #[arg(long, env = "FEED_MERGER_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,
}

impl Args {
    fn into_config(self) -> PipelineConfig {
        let mut config = PipelineConfig::new(self.feeds, self.output);
        config.keywords_path = self.keywords;
        config.format = self.format;
        if let Some(user_agent) = self.user_agent {
            config.fetch.user_agent = user_agent;
        }
        config.fetch.timeout_seconds = self.timeout_secs;
        config.fetch.max_retries = self.max_retries;
        config.fetch.concurrency = self.concurrency;
        config.rate_limit.domain_delay = Duration::from_secs(self.domain_delay_secs);
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("Starting feed-merger with feeds from {}", args.feeds.display());

    let pipeline = Pipeline::new(args.into_config())?;
    match pipeline.run().await {
        Ok(report) => {
            info!(
                "Finished: {} entries written to {}",
                report.entries_written,
                pipeline.config().output_path.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("Run failed: {}", e);
            Err(e.into())
        }
    }
}
