//! Integration tests for request pacing and adaptive throttling

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiki_ingest::ingest::{RateLimitConfig, RateLimiter};
use wiki_ingest::source::{build_http_client, ApiClient, ArticleSource, MediaWikiClient, SourceCapabilities};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn limiter(qps: f64, burst: usize, adaptive: bool) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(&RateLimitConfig {
        requests_per_second: qps,
        burst_limit: burst,
        window_secs: 60,
        adaptive,
    }))
}

fn source(server: &MockServer, limiter: Arc<RateLimiter>) -> MediaWikiClient {
    let http = build_http_client("wiki-ingest-tests/0.1", Duration::from_secs(2), Duration::from_secs(5)).unwrap();
    let api = ApiClient::new(http, server.uri(), limiter);
    MediaWikiClient::new(api, "https://wiki.example.org", SourceCapabilities::default())
}

#[tokio::test(start_paused = true)]
async fn test_shared_limiter_bounds_concurrent_callers() {
    let qps = 10.0;
    let burst = 5;
    let tasks = 4;
    let per_task = 5;
    let limiter = limiter(qps, burst, false);

    let start = tokio::time::Instant::now();
    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                for _ in 0..per_task {
                    limiter.acquire().await;
                    limiter.record_request(200);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let total = tasks * per_task;
    let lower_bound = (total - burst) as f64 / qps;
    let elapsed = start.elapsed().as_secs_f64();
    assert!(
        elapsed + 1e-9 >= lower_bound,
        "{total} requests took {elapsed}s, expected at least {lower_bound}s"
    );
    assert_eq!(limiter.stats().requests_in_window, total);
}

#[tokio::test]
async fn test_requests_to_server_are_paced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": { "pages": [{ "ns": 0, "title": "Paced", "missing": true }] }
        })))
        .mount(&server)
        .await;

    let qps = 20.0;
    let burst = 2;
    let total = 6;
    let source = source(&server, limiter(qps, burst, false));

    let start = Instant::now();
    for _ in 0..total {
        assert!(source.fetch("Paced").await.unwrap().is_none());
    }
    let elapsed = start.elapsed().as_secs_f64();

    let lower_bound = (total - burst) as f64 / qps;
    assert!(elapsed >= lower_bound, "elapsed {elapsed}s below {lower_bound}s");
    assert_eq!(server.received_requests().await.unwrap().len(), total);
}

#[tokio::test]
async fn test_server_429s_throttle_then_success_decays_streak() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(4)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": { "pages": [{ "ns": 0, "title": "Calm", "missing": true }] }
        })))
        .mount(&server)
        .await;

    let shared = limiter(100.0, 100, true);
    let source = source(&server, shared.clone());

    for _ in 0..4 {
        assert!(source.fetch("Calm").await.is_err());
    }
    // two reductions: after the third and the fourth 429
    let throttled = shared.current_qps();
    assert!((throttled - 64.0).abs() < 1e-6, "got {throttled}");

    assert!(source.fetch("Calm").await.unwrap().is_none());
    let stats = shared.stats();
    assert_eq!(stats.consecutive_429s, 3);
    // recovery waits for a quiet period after the last 429
    assert!((stats.current_qps - throttled).abs() < 1e-6);
    assert_eq!(stats.target_qps, 100.0);
}

#[tokio::test]
async fn test_non_adaptive_limiter_ignores_server_429s() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let shared = limiter(50.0, 50, false);
    let source = source(&server, shared.clone());
    for _ in 0..5 {
        assert!(source.fetch("Any").await.is_err());
    }

    let stats = shared.stats();
    assert_eq!(stats.current_qps, 50.0);
    assert_eq!(stats.consecutive_429s, 0);
    assert!(!stats.adaptive);
}
