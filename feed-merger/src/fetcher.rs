use crate::rate_limiter::DomainRateLimiter;
use crate::types::{FeedDocument, FetchConfig, MergerError, Result, Source};
use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound on a server supplied `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

/// Outcome of fetching one configured source.
#[derive(Debug)]
pub struct SourceFetch {
    pub source: Source,
    pub outcome: Result<FeedDocument>,
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<DomainRateLimiter>,
}

impl Fetcher {
    pub fn new(config: FetchConfig, rate_limiter: Arc<DomainRateLimiter>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetches one feed document.
    ///
    /// `429 Too Many Requests` is retried after the server's `Retry-After`
    /// delay, or an exponential backoff when none is given, up to
    /// `max_retries` times. Any other error status and any transport failure
    /// is terminal for this source.
    pub async fn fetch(&self, source: &Source) -> Result<FeedDocument> {
        let start_time = Instant::now();
        let mut backoff = self.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.rate_limiter.acquire(&source.domain).await;
            debug!("Fetching feed: {} (attempt {})", source.url, attempt);

            let mut response = self.client.get(&source.url).send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.config.max_retries {
                    return Err(MergerError::RetriesExhausted {
                        url: source.url.clone(),
                        attempts: attempt,
                    });
                }
                let delay = retry_after(response.headers())
                    .or_else(|| backoff.next_backoff())
                    .unwrap_or(self.config.max_backoff);
                warn!(
                    "429 Too Many Requests for {}, retrying in {:?} (attempt {}/{})",
                    source.url,
                    delay,
                    attempt,
                    self.config.max_retries + 1
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                return Err(MergerError::Status {
                    url: source.url.clone(),
                    status: status.as_u16(),
                });
            }

            let limit = self.config.max_feed_bytes();
            let too_large = || MergerError::FeedTooLarge {
                url: source.url.clone(),
                limit_mb: self.config.max_feed_size_mb,
            };
            if response.content_length().is_some_and(|length| length > limit as u64) {
                return Err(too_large());
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            // Chunked or compressed bodies carry no usable length.
            let mut body = Vec::new();
            while let Some(chunk) = response.chunk().await? {
                if body.len() + chunk.len() > limit {
                    return Err(too_large());
                }
                body.extend_from_slice(&chunk);
            }

            info!(
                "Fetched feed: {} ({} bytes in {}ms)",
                source.url,
                body.len(),
                start_time.elapsed().as_millis()
            );
            return Ok(FeedDocument {
                url: source.url.clone(),
                body,
                content_type,
                http_status: status.as_u16(),
            });
        }
    }

    /// Fetches every source, grouped by domain.
    ///
    /// Sources sharing a domain are always fetched one after another; up to
    /// `concurrency` domain groups run at once. Results come back in
    /// domain-sorted source order whatever the completion order.
    pub async fn fetch_all(&self, sources: &[Source]) -> Vec<SourceFetch> {
        let groups = group_by_domain(sources);
        info!("Fetching {} sources across {} domains", sources.len(), groups.len());

        let this = self;
        let grouped: Vec<Vec<SourceFetch>> = stream::iter(groups)
            .map(|group| async move {
                let mut results = Vec::with_capacity(group.len());
                for source in group {
                    let outcome = this.fetch(&source).await;
                    if let Err(e) = &outcome {
                        error!("Failed to fetch feed {}: {}", source.url, e);
                    }
                    results.push(SourceFetch { source, outcome });
                }
                results
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        grouped.into_iter().flatten().collect()
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.config.initial_backoff,
            initial_interval: self.config.initial_backoff,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.config.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Stable sort by domain, then split into runs of equal domain.
pub fn group_by_domain(sources: &[Source]) -> Vec<Vec<Source>> {
    let mut sorted = sources.to_vec();
    sorted.sort_by(|a, b| a.domain.cmp(&b.domain));

    let mut groups: Vec<Vec<Source>> = Vec::new();
    for source in sorted {
        match groups.last_mut() {
            Some(group) if group[0].domain == source.domain => group.push(source),
            _ => groups.push(vec![source]),
        }
    }
    groups
}

/// Reads `Retry-After` as delta-seconds or an HTTP date.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let delay = if let Ok(seconds) = value.parse::<u64>() {
        Duration::from_secs(seconds)
    } else {
        let date = DateTime::parse_from_rfc2822(value).ok()?;
        (date.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    };
    Some(delay.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RateLimitConfig;
    use axum::body::Body;
    use axum::extract::State;
    use axum::http::{header, HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title><link>https://example.com</link><description>d</description><item><title>One</title><link>https://example.com/1</link></item></channel></rss>"#;

    #[derive(Clone, Default)]
    struct AppState {
        throttled_hits: Arc<AtomicUsize>,
        always_throttled_hits: Arc<AtomicUsize>,
        missing_hits: Arc<AtomicUsize>,
        user_agents: Arc<StdMutex<Vec<String>>>,
        visits: Arc<StdMutex<Vec<Visit>>>,
    }

    #[derive(Debug, Clone)]
    struct Visit {
        host: String,
        path: &'static str,
        started: Instant,
        finished: Instant,
    }

    async fn ok_handler(State(state): State<AppState>, headers: AxumHeaders) -> Response {
        if let Some(agent) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
            state.user_agents.lock().unwrap().push(agent.to_string());
        }
        ([(header::CONTENT_TYPE, "application/rss+xml")], SAMPLE_RSS).into_response()
    }

    async fn throttled_once_handler(State(state): State<AppState>) -> Response {
        if state.throttled_hits.fetch_add(1, Ordering::SeqCst) == 0 {
            return (AxumStatus::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "2")], "slow down")
                .into_response();
        }
        ([(header::CONTENT_TYPE, "application/rss+xml")], SAMPLE_RSS).into_response()
    }

    async fn always_throttled_handler(State(state): State<AppState>) -> Response {
        state.always_throttled_hits.fetch_add(1, Ordering::SeqCst);
        (AxumStatus::TOO_MANY_REQUESTS, "slow down").into_response()
    }

    async fn missing_handler(State(state): State<AppState>) -> Response {
        state.missing_hits.fetch_add(1, Ordering::SeqCst);
        (AxumStatus::NOT_FOUND, "gone").into_response()
    }

    async fn record_visit(state: &AppState, headers: &AxumHeaders, path: &'static str, delay: Duration) {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(':').next())
            .unwrap_or_default()
            .to_string();
        let started = Instant::now();
        tokio::time::sleep(delay).await;
        state.visits.lock().unwrap().push(Visit {
            host,
            path,
            started,
            finished: Instant::now(),
        });
    }

    async fn slow_handler(State(state): State<AppState>, headers: AxumHeaders) -> Response {
        record_visit(&state, &headers, "/slow.xml", Duration::from_millis(300)).await;
        ([(header::CONTENT_TYPE, "application/rss+xml")], SAMPLE_RSS).into_response()
    }

    async fn quick_handler(State(state): State<AppState>, headers: AxumHeaders) -> Response {
        record_visit(&state, &headers, "/quick.xml", Duration::ZERO).await;
        ([(header::CONTENT_TYPE, "application/rss+xml")], SAMPLE_RSS).into_response()
    }

    async fn oversized_handler() -> Response {
        ([(header::CONTENT_TYPE, "application/rss+xml")], vec![b' '; 1024 * 1024 + 1]).into_response()
    }

    fn chunked_body(chunks: usize) -> Response {
        let chunks = (0..chunks).map(|_| Ok::<_, std::io::Error>(vec![b' '; 512 * 1024]));
        Body::from_stream(stream::iter(chunks)).into_response()
    }

    async fn chunked_limit_handler() -> Response {
        chunked_body(2)
    }

    async fn chunked_oversized_handler() -> Response {
        chunked_body(3)
    }

    async fn spawn_test_server() -> (String, AppState, tokio::task::JoinHandle<()>) {
        let state = AppState::default();
        let app = Router::new()
            .route("/feed.xml", get(ok_handler))
            .route("/throttled.xml", get(throttled_once_handler))
            .route("/always-throttled.xml", get(always_throttled_handler))
            .route("/missing.xml", get(missing_handler))
            .route("/slow.xml", get(slow_handler))
            .route("/quick.xml", get(quick_handler))
            .route("/oversized.xml", get(oversized_handler))
            .route("/chunked-limit.xml", get(chunked_limit_handler))
            .route("/chunked-oversized.xml", get(chunked_oversized_handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        (format!("http://{address}"), state, handle)
    }

    fn test_config(max_retries: u32) -> FetchConfig {
        FetchConfig {
            user_agent: "feed-merger-test/1.0".to_string(),
            timeout_seconds: 5,
            max_retries,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(80),
            ..Default::default()
        }
    }

    fn fetcher_with(config: FetchConfig, domain_delay: Duration) -> Fetcher {
        let limiter = DomainRateLimiter::new(RateLimitConfig {
            capacity: 100,
            refill_per_second: 100.0,
            domain_delay,
        })
        .unwrap();
        Fetcher::new(config, Arc::new(limiter)).unwrap()
    }

    fn test_fetcher(max_retries: u32) -> Fetcher {
        fetcher_with(test_config(max_retries), Duration::from_millis(10))
    }

    fn source(url: String) -> Source {
        Source::parse(&url).unwrap()
    }

    #[tokio::test]
    async fn fetch_sends_user_agent_and_returns_body() {
        let (base, state, server) = spawn_test_server().await;
        let fetcher = test_fetcher(2);

        let document = fetcher
            .fetch(&source(format!("{base}/feed.xml")))
            .await
            .expect("fetch should succeed");

        assert_eq!(document.http_status, 200);
        assert_eq!(document.content_type.as_deref(), Some("application/rss+xml"));
        assert!(document.body.starts_with(b"<?xml"));
        assert_eq!(
            state.user_agents.lock().unwrap().clone(),
            vec!["feed-merger-test/1.0".to_string()]
        );
        server.abort();
    }

    #[tokio::test]
    async fn fetch_honours_retry_after_on_429() {
        let (base, state, server) = spawn_test_server().await;
        let fetcher = test_fetcher(3);
        let start = Instant::now();

        let document = fetcher
            .fetch(&source(format!("{base}/throttled.xml")))
            .await
            .expect("fetch should succeed after the retry");

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(document.http_status, 200);
        assert_eq!(state.throttled_hits.load(Ordering::SeqCst), 2);
        server.abort();
    }

    #[tokio::test]
    async fn fetch_gives_up_after_max_retries() {
        let (base, state, server) = spawn_test_server().await;
        let fetcher = test_fetcher(2);

        let result = fetcher
            .fetch(&source(format!("{base}/always-throttled.xml")))
            .await;

        match result {
            Err(MergerError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(state.always_throttled_hits.load(Ordering::SeqCst), 3);
        server.abort();
    }

    #[tokio::test]
    async fn other_error_statuses_are_terminal() {
        let (base, state, server) = spawn_test_server().await;
        let fetcher = test_fetcher(5);

        let result = fetcher.fetch(&source(format!("{base}/missing.xml"))).await;

        assert!(matches!(result, Err(MergerError::Status { status: 404, .. })));
        assert_eq!(state.missing_hits.load(Ordering::SeqCst), 1);
        server.abort();
    }

    #[tokio::test]
    async fn fetch_all_keeps_going_after_a_failure() {
        let (base, _state, server) = spawn_test_server().await;
        let fetcher = test_fetcher(0);
        let sources = vec![
            source(format!("{base}/missing.xml")),
            source(format!("{base}/feed.xml")),
        ];

        let results = fetcher.fetch_all(&sources).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].outcome.is_err());
        assert!(results[1].outcome.is_ok());
        server.abort();
    }

    #[tokio::test]
    async fn fetch_all_overlaps_domains_but_serializes_each_one() {
        let (base, state, server) = spawn_test_server().await;
        let port = base.rsplit(':').next().unwrap();
        let config = FetchConfig {
            concurrency: 3,
            ..test_config(0)
        };
        let domain_delay = Duration::from_millis(400);
        let fetcher = fetcher_with(config, domain_delay);
        let sources = vec![
            source(format!("http://localhost:{port}/quick.xml")),
            source(format!("http://127.0.0.1:{port}/slow.xml")),
            source(format!("http://127.0.0.1:{port}/quick.xml")),
        ];

        let results = fetcher.fetch_all(&sources).await;

        let urls: Vec<&str> = results.iter().map(|r| r.source.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                format!("http://127.0.0.1:{port}/slow.xml"),
                format!("http://127.0.0.1:{port}/quick.xml"),
                format!("http://localhost:{port}/quick.xml"),
            ]
        );
        assert!(results.iter().all(|r| r.outcome.is_ok()));

        let visits = state.visits.lock().unwrap().clone();
        let find = |host: &str, path: &str| {
            visits
                .iter()
                .find(|v| v.host == host && v.path == path)
                .cloned()
                .unwrap_or_else(|| panic!("no visit to {host}{path} in {visits:?}"))
        };
        let slow = find("127.0.0.1", "/slow.xml");
        let after_slow = find("127.0.0.1", "/quick.xml");
        let other_domain = find("localhost", "/quick.xml");

        assert!(after_slow.started >= slow.finished);
        assert!(after_slow.started.duration_since(slow.started) >= domain_delay);
        assert!(other_domain.started < slow.finished);
        server.abort();
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected_with_or_without_length() {
        let (base, _state, server) = spawn_test_server().await;
        let config = FetchConfig {
            max_feed_size_mb: 1,
            ..test_config(0)
        };
        let fetcher = fetcher_with(config, Duration::from_millis(10));

        for path in ["oversized.xml", "chunked-oversized.xml"] {
            let result = fetcher.fetch(&source(format!("{base}/{path}"))).await;
            assert!(
                matches!(result, Err(MergerError::FeedTooLarge { limit_mb: 1, .. })),
                "{path}: {result:?}"
            );
        }

        let document = fetcher
            .fetch(&source(format!("{base}/chunked-limit.xml")))
            .await
            .expect("a body exactly at the limit is accepted");
        assert_eq!(document.body.len(), 1024 * 1024);
        server.abort();
    }

    #[test]
    fn sources_are_grouped_by_domain_in_stable_order() {
        let sources: Vec<Source> = [
            "https://b.example/1",
            "https://a.example/1",
            "https://b.example/2",
            "https://a.example/2",
        ]
        .iter()
        .map(|url| Source::parse(url).unwrap())
        .collect();

        let groups = group_by_domain(&sources);
        let urls: Vec<Vec<&str>> = groups
            .iter()
            .map(|group| group.iter().map(|s| s.url.as_str()).collect())
            .collect();

        assert_eq!(
            urls,
            vec![
                vec!["https://a.example/1", "https://a.example/2"],
                vec!["https://b.example/1", "https://b.example/2"],
            ]
        );
    }

    #[test]
    fn retry_after_accepts_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "2".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));

        headers.insert(RETRY_AFTER, "99999".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(MAX_RETRY_AFTER));

        headers.insert(RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn retry_after_in_the_past_means_now() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::ZERO));
    }
}
