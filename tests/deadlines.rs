//! Request and body deadlines, on a paused clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use admission_gateway::config::ShieldConfig;
use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request, StatusCode};
use axum::routing::{any, post};
use axum::Router;
use tokio::time::Instant;
use tower::ServiceExt;

mod common;

use common::{body_json, get, key, shield, wait_for_in_flight, Trickle, CLIENT_HEADER};

fn short_deadlines() -> ShieldConfig {
    ShieldConfig {
        request_timeout_ms: 1_000,
        header_timeout_ms: 500,
        ..ShieldConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn hung_handler_times_out_and_frees_its_slot() {
    let shield = shield(short_deadlines());
    let app = shield.apply(Router::new().route(
        "/hang",
        any(|| async {
            std::future::pending::<()>().await;
            "unreachable"
        }),
    ));

    let started = Instant::now();
    let response = app.oneshot(get("/hang", "stuck")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(elapsed >= Duration::from_millis(1_000), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_100), "fired late: {elapsed:?}");
    assert_eq!(body_json(response).await["error"]["code"], "REQUEST_TIMEOUT");

    assert_eq!(shield.in_flight().count(&key("stuck")), 0);
    assert_eq!(shield.in_flight().tracked_keys(), 0);
    assert_eq!(shield.monitor().live_samples(), 0);
}

#[tokio::test(start_paused = true)]
async fn work_finishing_inside_the_deadline_is_untouched() {
    let shield = shield(short_deadlines());
    let app = shield.apply(Router::new().route(
        "/slowish",
        any(|| async {
            tokio::time::sleep(Duration::from_millis(900)).await;
            "made it"
        }),
    ));

    let response = app.oneshot(get("/slowish", "c")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn late_completion_after_timeout_is_discarded() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let shield = shield(short_deadlines());
    let app = shield.apply(Router::new().route(
        "/late",
        any(move || {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(1_500)).await;
                flag.store(true, Ordering::SeqCst);
                "too late"
            }
        }),
    ));

    let response = app.oneshot(get("/late", "c")).await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    // The abandoned work keeps running to completion on its own.
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(shield.in_flight().total(), 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_request_releases_its_slot() {
    let shield = shield(ShieldConfig::default());
    let app = shield.apply(Router::new().route(
        "/hang",
        any(|| async {
            std::future::pending::<()>().await;
            "unreachable"
        }),
    ));

    let task = tokio::spawn(app.oneshot(get("/hang", "gone")));
    wait_for_in_flight(&shield, "gone", 1).await;

    task.abort();
    let _ = task.await;
    assert_eq!(shield.in_flight().count(&key("gone")), 0);
}

#[tokio::test(start_paused = true)]
async fn trickled_body_is_cut_off() {
    let reached = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&reached);
    let shield = shield(short_deadlines());
    let app = shield.apply(Router::new().route(
        "/upload",
        post(move |_body: Bytes| {
            flag.store(true, Ordering::SeqCst);
            async { "stored" }
        }),
    ));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_TYPE, "application/json")
        .header(CLIENT_HEADER, "drip")
        .body(Trickle::body())
        .unwrap();

    let started = Instant::now();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(started.elapsed() < Duration::from_millis(1_000), "slow-client deadline must win");
    assert_eq!(response.headers()[header::CONNECTION], "close");
    assert_eq!(body_json(response).await["error"]["code"], "SLOW_CLIENT");
    assert!(!reached.load(Ordering::SeqCst));
    assert_eq!(shield.in_flight().count(&key("drip")), 0);
}

#[tokio::test(start_paused = true)]
async fn declared_oversize_is_refused_before_reading() {
    let shield = shield(ShieldConfig {
        max_body_bytes: 1_024,
        ..short_deadlines()
    });
    let app = shield.apply(Router::new().route("/upload", post(|| async { "stored" })));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_LENGTH, "10485760")
        .body(Trickle::body())
        .unwrap();

    let started = Instant::now();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(started.elapsed() < Duration::from_millis(500), "must not wait for the body");
}

#[tokio::test(start_paused = true)]
async fn complete_body_passes_the_read_deadline() {
    let shield = shield(short_deadlines());
    let app = shield.apply(Router::new().route("/upload", post(|body: Bytes| async move { body })));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("all at once"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
