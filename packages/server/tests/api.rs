//! End-to-end tests against the assembled router with in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use server_core::kernel::analyzer::ScriptedAnalyzer;
use server_core::kernel::articles::{ArticleData, Author, InMemoryArticleStore};
use server_core::kernel::deps::ServerDeps;
use server_core::kernel::jobs::{InMemoryQueue, WorkerConfig, WorkerPool};
use server_core::kernel::rate_limit::{InMemoryRateLimiter, RateLimits};
use server_core::kernel::trending::{StaticTrendingFeed, TrendingRepo};
use server_core::server::build_app;

fn sample_article(headline: &str) -> ArticleData {
    ArticleData {
        headline: headline.to_string(),
        author: Author {
            name: "Staff Writer".to_string(),
            title: "Editor".to_string(),
            avatar: "https://example.org/avatar.svg".to_string(),
            bio: "Covers the repository beat.".to_string(),
            twitter: "staffwriter".to_string(),
        },
        timestamp: "January 1, 2026, 9:00 AM UTC".to_string(),
        category: "Startups".to_string(),
        image: "https://example.org/hero.jpg".to_string(),
        image_credit: "Generated".to_string(),
        tags: vec!["Tech".to_string()],
        content: vec!["First paragraph.".to_string()],
    }
}

fn test_deps(analyzer: ScriptedAnalyzer, limits: RateLimits) -> Arc<ServerDeps> {
    Arc::new(ServerDeps::new(
        Arc::new(InMemoryQueue::new()),
        Arc::new(InMemoryArticleStore::new()),
        Arc::new(InMemoryRateLimiter::new(limits)),
        Arc::new(analyzer),
        Arc::new(StaticTrendingFeed::empty()),
    ))
}

fn test_app() -> (Router, Arc<ServerDeps>) {
    let deps = test_deps(
        ScriptedAnalyzer::completing_with(sample_article("Generated")),
        RateLimits::default(),
    );
    (build_app(deps.clone()), deps)
}

fn generate_request(repo_url: &str, client: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", client)
        .body(Body::from(json!({ "repoUrl": repo_url }).to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn generate_admits_a_new_repository() {
    let (app, _) = test_app();

    let response = app
        .oneshot(generate_request("https://github.com/acme/widget", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

    let body = body_json(response).await;
    assert_eq!(body["cached"], false);
    assert_eq!(body["slug"], "acme-widget");
    assert_eq!(body["position"], 1);
    assert!(body["jobId"].as_str().unwrap().parse::<uuid::Uuid>().is_ok());
}

#[tokio::test]
async fn duplicate_requests_each_get_their_own_job() {
    let (app, _) = test_app();

    let first = body_json(
        app.clone()
            .oneshot(generate_request("https://github.com/acme/widget", "10.0.0.1"))
            .await
            .unwrap(),
    )
    .await;
    let second = body_json(
        app.oneshot(generate_request("https://github.com/acme/widget", "10.0.0.1"))
            .await
            .unwrap(),
    )
    .await;

    // No dedup against in-flight jobs; the second waits behind the first.
    assert_ne!(first["jobId"], second["jobId"]);
    assert_eq!(second["position"], 2);
}

#[tokio::test]
async fn admitted_position_counts_active_jobs() {
    let (app, deps) = test_app();

    // One job already running: depth stays 1 even though nothing is waiting.
    deps.queue
        .enqueue("https://github.com/acme/first", "acme-first")
        .await
        .unwrap();
    deps.queue.claim_next().await.unwrap();

    let body = body_json(
        app.oneshot(generate_request("https://github.com/acme/second", "10.0.0.1"))
            .await
            .unwrap(),
    )
    .await;

    // Position is the queue depth after admission, so the active job counts.
    assert_eq!(body["position"], 2);
}

#[tokio::test]
async fn malformed_repository_url_is_rejected() {
    let (app, deps) = test_app();

    let response = app
        .oneshot(generate_request("https://example.com/not/a/repo-host", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("Invalid repository URL"));
    assert_eq!(deps.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn client_limit_returns_429_without_admitting() {
    let deps = test_deps(
        ScriptedAnalyzer::completing_with(sample_article("x")),
        RateLimits {
            global_per_day: 1000,
            client_per_day: 1,
        },
    );
    let app = build_app(deps.clone());

    let ok = app
        .clone()
        .oneshot(generate_request("https://github.com/acme/one", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let limited = app
        .clone()
        .oneshot(generate_request("https://github.com/acme/two", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key(header::RETRY_AFTER));
    let body = body_json(limited).await;
    assert!(body["error"].as_str().unwrap().contains("daily limit"));

    // The rejected request admitted nothing.
    assert_eq!(deps.queue.depth().await.unwrap(), 1);

    // A different client is unaffected.
    let other = app
        .oneshot(generate_request("https://github.com/acme/two", "10.0.0.2"))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn cached_article_bypasses_queue_and_limiter() {
    let deps = test_deps(
        ScriptedAnalyzer::completing_with(sample_article("x")),
        RateLimits {
            global_per_day: 1000,
            // A zero budget proves the cache path never consults the limiter.
            client_per_day: 0,
        },
    );
    deps.articles
        .save(
            "acme-widget",
            "https://github.com/acme/widget",
            sample_article("Cached story"),
            None,
        )
        .await
        .unwrap();
    let app = build_app(deps.clone());

    let response = app
        .oneshot(generate_request("https://github.com/acme/widget", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["cached"], true);
    assert_eq!(body["article"]["article"]["headline"], "Cached story");
    assert_eq!(deps.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn article_lifecycle_get_head_delete() {
    let (app, deps) = test_app();

    let missing = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/article/acme-widget")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    deps.articles
        .save(
            "acme-widget",
            "https://github.com/acme/widget",
            sample_article("Launch day"),
            None,
        )
        .await
        .unwrap();

    let fetched = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/article/acme-widget")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    let body = body_json(fetched).await;
    assert_eq!(body["slug"], "acme-widget");
    assert_eq!(body["sourceUrl"], "https://github.com/acme/widget");
    assert_eq!(body["article"]["imageCredit"], "Generated");

    let head = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::HEAD)
                .uri("/api/article/acme-widget")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(head.status(), StatusCode::OK);

    let deleted = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/api/article/acme-widget")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    assert!(!deps.articles.exists("acme-widget").await.unwrap());

    let gone = app
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/api/article/acme-widget")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn slug_with_invalid_characters_is_rejected() {
    let (app, _) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/article/Acme_Widget")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_and_search_articles() {
    let (app, deps) = test_app();
    for i in 0..3 {
        deps.articles
            .save(
                &format!("owner-repo-{i}"),
                &format!("https://github.com/owner/repo-{i}"),
                sample_article(&format!("Story {i}")),
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let listed = body_json(
        app.clone()
            .oneshot(
                Request::builder()
                    .uri("/api/article?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(listed["total"], 3);
    assert_eq!(listed["articles"].as_array().unwrap().len(), 2);
    assert_eq!(listed["articles"][0]["slug"], "owner-repo-2");

    let found = body_json(
        app.clone()
            .oneshot(
                Request::builder()
                    .uri("/api/article/search?q=story%201")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(found["results"].as_array().unwrap().len(), 1);

    let empty = app
        .oneshot(
            Request::builder()
                .uri("/api/article/search?q=")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_status_and_timestamp() {
    let (app, _) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].as_str().unwrap().contains('T'));
    assert_eq!(body["queueDepth"], 0);
}

#[tokio::test]
async fn trending_suggests_only_repos_without_articles() {
    let deps = Arc::new(ServerDeps::new(
        Arc::new(InMemoryQueue::new()),
        Arc::new(InMemoryArticleStore::new()),
        Arc::new(InMemoryRateLimiter::new(RateLimits::default())),
        Arc::new(ScriptedAnalyzer::new(vec![])),
        Arc::new(StaticTrendingFeed::new(vec![
            TrendingRepo {
                owner: "acme".to_string(),
                name: "widget".to_string(),
                url: "https://github.com/acme/widget".to_string(),
                description: Some("Widgets.".to_string()),
                stars: 9000,
                language: Some("Rust".to_string()),
            },
            TrendingRepo {
                owner: "acme".to_string(),
                name: "gadget".to_string(),
                url: "https://github.com/acme/gadget".to_string(),
                description: None,
                stars: 100,
                language: None,
            },
        ])),
    ));
    // "widget" is already covered, so "gadget" is the only valid suggestion.
    deps.articles
        .save(
            "acme-widget",
            "https://github.com/acme/widget",
            sample_article("Covered"),
            None,
        )
        .await
        .unwrap();
    let app = build_app(deps);

    let body = body_json(
        app.oneshot(
            Request::builder()
                .uri("/api/trending")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap(),
    )
    .await;

    assert_eq!(body["suggestion"]["name"], "gadget");
    assert_eq!(body["suggestion"]["url"], "https://github.com/acme/gadget");
}

#[tokio::test]
async fn trending_with_an_empty_feed_suggests_nothing() {
    let (app, _) = test_app();

    let body = body_json(
        app.oneshot(
            Request::builder()
                .uri("/api/trending")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap(),
    )
    .await;

    assert!(body["suggestion"].is_null());
}

#[tokio::test]
async fn progress_stream_for_an_unknown_job_ends_with_an_error_event() {
    let (app, _) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/progress/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains(r#""type":"error""#));
    assert!(body.contains("Unknown job"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_flow_streams_queued_through_complete() {
    // Paced events keep the job in flight while the stream attaches.
    let deps = test_deps(
        ScriptedAnalyzer::completing_with(sample_article("Fresh off the press"))
            .with_delay(Duration::from_millis(150)),
        RateLimits::default(),
    );
    let app = build_app(deps.clone());

    let shutdown = CancellationToken::new();
    let workers = WorkerPool::with_config(
        deps.clone(),
        WorkerConfig {
            concurrency: 1,
            poll_interval: Duration::from_millis(10),
            sweep_interval: Duration::from_secs(60),
        },
    )
    .spawn(shutdown.clone());

    // Two admissions with a single worker: the second job is still waiting
    // when its stream attaches, so a `queued` event is guaranteed.
    app.clone()
        .oneshot(generate_request("https://github.com/acme/other", "10.0.0.1"))
        .await
        .unwrap();
    let admitted = body_json(
        app.clone()
            .oneshot(generate_request("https://github.com/acme/widget", "10.0.0.1"))
            .await
            .unwrap(),
    )
    .await;
    let job_id = admitted["jobId"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/progress/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // The stream ends after the terminal event, so collecting is bounded.
    let bytes = tokio::time::timeout(
        Duration::from_secs(5),
        response.into_body().collect(),
    )
    .await
    .expect("stream did not terminate")
    .unwrap()
    .to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(body.contains(r#""type":"queued""#));
    assert!(body.contains(r#""type":"complete""#));
    assert!(body.contains("Fresh off the press"));

    // The article is readable the moment the terminal event is observed.
    let article = app
        .oneshot(
            Request::builder()
                .uri("/api/article/acme-widget")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(article.status(), StatusCode::OK);

    shutdown.cancel();
    for handle in workers {
        handle.await.unwrap();
    }
}
