#![allow(missing_docs)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use murmur::http::router;
use murmur::timeline::{cursor, FanoutMode};
use murmur::types::{Timestamp, TweetId};
use murmur::{FeedService, ServiceOptions};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let svc = FeedService::open(ServiceOptions::memory().fanout_mode(FanoutMode::Inline))
        .expect("service");
    router(Arc::new(svc))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, json)
}

#[tokio::test]
async fn follow_post_and_read_timeline() {
    let app = app();
    let (status, _) = send(
        &app,
        Method::POST,
        "/follows",
        Some(json!({"follower": 1, "followee": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    for text in ["one", "two", "three"] {
        let (status, body) = send(
            &app,
            Method::POST,
            "/tweets",
            Some(json!({"user": 2, "text": text})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["tweet_id"].as_u64().is_some());
    }

    let (status, page) = send(&app, Method::GET, "/users/1/timeline?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let tweets = page["tweets"].as_array().expect("tweets");
    assert_eq!(tweets.len(), 2);
    assert_eq!(tweets[0]["tweet_text"], "three");
    let cursor = page["next_cursor"].as_str().expect("cursor").to_string();

    let (status, rest) = send(
        &app,
        Method::GET,
        &format!("/users/1/timeline?limit=2&cursor={cursor}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rest["tweets"].as_array().expect("tweets").len(), 1);
    assert!(rest["next_cursor"].is_null());
    assert_eq!(rest["partial"], false);
}

#[tokio::test]
async fn user_tweets_route_lists_authored_tweets() {
    let app = app();
    send(
        &app,
        Method::POST,
        "/tweets",
        Some(json!({"user": 7, "text": "mine"})),
    )
    .await;
    let (status, page) = send(&app, Method::GET, "/users/7/tweets", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["source"], "storage");
    assert_eq!(page["tweets"][0]["user_id"], 7);
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/follows",
        Some(json!({"follower": 3, "followee": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("themselves"));

    send(
        &app,
        Method::POST,
        "/follows",
        Some(json!({"follower": 1, "followee": 2})),
    )
    .await;
    let (status, _) = send(
        &app,
        Method::POST,
        "/follows",
        Some(json!({"follower": 1, "followee": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let long = "x".repeat(141);
    let (status, _) = send(
        &app,
        Method::POST,
        "/tweets",
        Some(json!({"user": 1, "text": long})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::GET, "/users/1/timeline?cursor=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("cursor"));

    let crafted = cursor::encode(Timestamp(i64::MAX), TweetId(1));
    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/users/1/tweets?cursor={crafted}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("cursor"));

    let (status, _) = send(&app, Method::GET, "/users/1/timeline?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unfollow_and_stats() {
    let app = app();
    send(
        &app,
        Method::POST,
        "/follows",
        Some(json!({"follower": 1, "followee": 2})),
    )
    .await;
    let (status, _) = send(&app, Method::DELETE, "/follows/1/2", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, stats) = send(&app, Method::GET, "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["store"]["follows"], 0);
    assert_eq!(stats["fanout_backlog"], 0);
}
