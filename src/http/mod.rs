//! JSON-over-HTTP transport for [`FeedService`].

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{net::TcpListener, task};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::service::{FeedService, ServiceStats};
use crate::timeline::TweetPage;
use crate::types::{FeedError, Timestamp, TweetId, UserId};

/// Runtime options used to boot the HTTP server.
#[derive(Clone, Debug)]
pub struct ServeOptions {
    /// Network interface to bind to.
    pub host: IpAddr,
    /// Listening port.
    pub port: u16,
}

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Binding or serving failed.
    #[error("http server: {0}")]
    Io(#[from] std::io::Error),
}

type AppState = Arc<FeedService>;

/// Serves `service` until Ctrl-C, then drains pending fan-out.
pub async fn serve(service: Arc<FeedService>, options: ServeOptions) -> Result<(), ServeError> {
    let addr = SocketAddr::from((options.host, options.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http.listening");
    axum::serve(listener, router(Arc::clone(&service)).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    let drained = Arc::clone(&service);
    if let Err(err) = task::spawn_blocking(move || drained.shutdown()).await {
        tracing::error!(?err, "http.shutdown_failed");
    }
    Ok(())
}

/// Routes for every feed operation.
pub fn router(service: Arc<FeedService>) -> Router {
    Router::new()
        .route("/follows", post(follow_handler))
        .route("/follows/:follower/:followee", delete(unfollow_handler))
        .route("/tweets", post(post_tweet_handler))
        .route("/users/:id/tweets", get(user_tweets_handler))
        .route("/users/:id/timeline", get(home_timeline_handler))
        .route("/stats", get(stats_handler))
        .with_state(service)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Runs a blocking service call off the async workers.
async fn blocking<T, F>(state: AppState, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&FeedService) -> crate::types::Result<T> + Send + 'static,
{
    Ok(task::spawn_blocking(move || f(state.as_ref())).await??)
}

async fn follow_handler(
    State(state): State<AppState>,
    Json(body): Json<FollowRequest>,
) -> Result<StatusCode, AppError> {
    blocking(state, move |svc| svc.follow(body.follower, body.followee)).await?;
    Ok(StatusCode::CREATED)
}

async fn unfollow_handler(
    State(state): State<AppState>,
    Path((follower, followee)): Path<(u64, u64)>,
) -> Result<StatusCode, AppError> {
    blocking(state, move |svc| {
        svc.unfollow(UserId(follower), UserId(followee))
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_tweet_handler(
    State(state): State<AppState>,
    Json(body): Json<PostTweetRequest>,
) -> Result<(StatusCode, Json<PostTweetResponse>), AppError> {
    let tweet = blocking(state, move |svc| svc.post_tweet(body.user, &body.text)).await?;
    Ok((
        StatusCode::CREATED,
        Json(PostTweetResponse {
            tweet_id: tweet.tweet_id,
            tweet_ts: tweet.tweet_ts,
        }),
    ))
}

async fn user_tweets_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(params): Query<PageParams>,
) -> Result<Json<TweetPage>, AppError> {
    let page = blocking(state, move |svc| {
        svc.user_tweets(UserId(id), params.cursor.as_deref(), params.limit)
    })
    .await?;
    Ok(Json(page))
}

async fn home_timeline_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(params): Query<PageParams>,
) -> Result<Json<TweetPage>, AppError> {
    let page = blocking(state, move |svc| {
        svc.home_timeline(UserId(id), params.cursor.as_deref(), params.limit)
    })
    .await?;
    Ok(Json(page))
}

async fn stats_handler(State(state): State<AppState>) -> Result<Json<ServiceStats>, AppError> {
    Ok(Json(blocking(state, |svc| svc.stats()).await?))
}

#[derive(Debug, Deserialize)]
struct FollowRequest {
    follower: UserId,
    followee: UserId,
}

#[derive(Debug, Deserialize)]
struct PostTweetRequest {
    user: UserId,
    text: String,
}

#[derive(Debug, Serialize)]
struct PostTweetResponse {
    tweet_id: TweetId,
    tweet_ts: Timestamp,
}

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("internal task failure: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Feed(err) => match err {
                FeedError::Validation(_) | FeedError::InvalidCursor(_) => StatusCode::BAD_REQUEST,
                FeedError::DuplicateEdge { .. } => StatusCode::CONFLICT,
                FeedError::NotFound(_) => StatusCode::NOT_FOUND,
                FeedError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                FeedError::StorageUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                FeedError::Storage(_) | FeedError::Corruption(_) | FeedError::Io(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(err = %self, "http.request_failed");
        }
        let body = Json(ErrorPayload {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    error: String,
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("http.shutdown_signal"),
        Err(err) => tracing::error!(?err, "failed to listen for shutdown signal"),
    }
}
