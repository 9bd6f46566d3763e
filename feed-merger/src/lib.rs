pub mod types;
pub mod config;
pub mod rate_limiter;
pub mod fetcher;
pub mod parser;
pub mod merger;
pub mod normalize;
pub mod filter;
pub mod output;
pub mod pipeline;

pub use types::*;
pub use config::PipelineConfig;
pub use rate_limiter::DomainRateLimiter;
pub use fetcher::{Fetcher, SourceFetch};
pub use parser::parse_feed_bytes;
pub use merger::{merge_batches, MergeOutput, MergeStats, Merger};
pub use normalize::{Normalizer, NormalizerConfig, OriginRegistry};
pub use filter::KeywordFilter;
pub use output::OutputFormat;
pub use pipeline::{Pipeline, RunReport};
