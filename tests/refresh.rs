mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::future::join_all;
use genwire::{
    api::Client,
    auth::{TokenRefreshCoordinator, TokenStore},
};
use serde_json::{json, Value};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use common::*;

const CALLERS: usize = 8;

fn refresh_ok() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(json!({
            "access_token": ROTATED_TOKEN,
            "user": { "id": 1 },
        }))
        .set_delay(Duration::from_millis(200))
}

#[tokio::test]
async fn test_concurrent_unauthorized_share_one_refresh() {
    init_logger();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("authorization", format!("Bearer {}", ROTATED_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(CALLERS as u64)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(refresh_ok())
        .expect(1)
        .mount(&server)
        .await;

    let store = tokens();
    let client = Client::new(&api_config(&server.uri()), dyn_tokens(&store)).unwrap();

    let results = join_all((0..CALLERS).map(|_| client.get::<Value>("/me"))).await;

    for result in results {
        assert_eq!(result.unwrap()["ok"], true);
    }

    let pair = store.get().await.unwrap();
    assert_eq!(pair.access_token, ROTATED_TOKEN);
    assert_eq!(pair.refresh_token, REFRESH_TOKEN, "unrotated refresh token kept");
    assert!(!client.refresher().is_refreshing());
}

#[tokio::test]
async fn test_concurrent_unauthorized_all_fail_when_refresh_rejected() {
    init_logger();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(403).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let store = tokens();
    let called = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&called);
    let client = Client::new(&api_config(&server.uri()), dyn_tokens(&store))
        .unwrap()
        .on_unauthorized(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let results = join_all((0..CALLERS).map(|_| client.get::<Value>("/me"))).await;

    for result in results {
        assert!(result.unwrap_err().is_unauthorized());
    }
    assert!(called.load(Ordering::SeqCst) >= 1);
    assert!(store.get().await.is_none());
}

#[tokio::test]
async fn test_refresh_slot_released_after_completion() {
    init_logger();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok())
        .expect(2)
        .mount(&server)
        .await;

    let store = tokens();
    let url = url::Url::parse(&format!("{}/auth/refresh", server.uri())).unwrap();
    let refresher = TokenRefreshCoordinator::new(
        reqwest::Client::new(),
        url,
        Duration::from_secs(2),
        dyn_tokens(&store),
    );

    let (first, second) = tokio::join!(refresher.refresh(), refresher.refresh());
    assert_eq!(first.as_deref(), Some(ROTATED_TOKEN));
    assert_eq!(first, second);

    assert!(!refresher.is_refreshing());
    assert_eq!(refresher.refresh().await.as_deref(), Some(ROTATED_TOKEN));
}

#[tokio::test]
async fn test_refresh_timeout_resolves_none() {
    init_logger();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(refresh_ok().set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let store = tokens();
    let url = url::Url::parse(&format!("{}/auth/refresh", server.uri())).unwrap();
    let refresher = TokenRefreshCoordinator::new(
        reqwest::Client::new(),
        url,
        Duration::from_millis(100),
        dyn_tokens(&store),
    );

    assert_eq!(refresher.refresh().await, None);
    assert!(store.get().await.is_none());
}
