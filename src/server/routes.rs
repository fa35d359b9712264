//! HTTP routes
//!
//! Thin adapters from requests to service calls:
//! - POST   /accounts                    - Sign up
//! - GET    /accounts/{id}               - Account profile
//! - POST   /sessions                    - Log in, returns the account and a token
//! - POST   /posts                       - Create a post
//! - GET    /posts/{id}                  - Read a post
//! - PUT    /posts/{id}                  - Edit own post
//! - DELETE /posts/{id}                  - Delete own post with its comments and likes
//! - GET    /accounts/{id}/posts         - Posts of an account, newest first
//! - POST   /posts/{id}/comments         - Comment on a post
//! - GET    /posts/{id}/comments[/count] - Comments of a post
//! - PUT    /comments/{id}               - Edit own comment
//! - DELETE /comments/{id}               - Delete own comment
//! - POST   /posts/{id}/likes            - Like a post
//! - DELETE /posts/{id}/likes            - Unlike a post
//! - GET    /posts/{id}/likes[/count]    - Accounts that liked a post
//! - POST   /accounts/{id}/follow        - Follow an account
//! - DELETE /accounts/{id}/follow        - Unfollow an account
//! - GET    /accounts/{id}/followers[/count]
//! - GET    /accounts/{id}/following[/count]
//! - GET    /health                      - Liveness probe
//!
//! Everything except signup, login and health needs an
//! `Authorization: Bearer <token>` header.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::auth::extract_token_from_header;
use crate::error::{AgoraError, ErrorKind, Result};

use super::http::AppState;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 64 * 1024;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub account_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ContentRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub node_id: u16,
}

// =============================================================================
// Dispatch
// =============================================================================

/// Route a request to its handler
pub async fn dispatch(state: Arc<AppState>, req: Request<Incoming>) -> Result<Response<BoxBody>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let services = &state.services;

    match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Ok(json_response(
            StatusCode::OK,
            &HealthResponse {
                healthy: true,
                version: env!("CARGO_PKG_VERSION"),
                node_id: state.args.node_id,
            },
        )),

        // Accounts and sessions
        (&Method::POST, ["accounts"]) => {
            let body: CredentialsRequest = read_json(req).await?;
            let account = services
                .accounts
                .create_account(&body.account_name, &body.password)
                .await?;
            Ok(json_response(StatusCode::CREATED, &account))
        }
        (&Method::GET, ["accounts", id]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let account = services.accounts.get_account(&token, id).await?;
            Ok(json_response(StatusCode::OK, &account))
        }
        (&Method::POST, ["sessions"]) => {
            let body: CredentialsRequest = read_json(req).await?;
            let session = services
                .accounts
                .create_session(&body.account_name, &body.password)
                .await?;
            Ok(json_response(StatusCode::CREATED, &session))
        }

        // Posts
        (&Method::POST, ["posts"]) => {
            let token = bearer(&req)?;
            let body: ContentRequest = read_json(req).await?;
            let post = services.posts.create_post(&token, &body.content).await?;
            Ok(json_response(StatusCode::CREATED, &post))
        }
        (&Method::GET, ["posts", id]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let post = services.posts.get_post(&token, id).await?;
            Ok(json_response(StatusCode::OK, &post))
        }
        (&Method::PUT, ["posts", id]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let body: ContentRequest = read_json(req).await?;
            let post = services.posts.update_post(&token, id, &body.content).await?;
            Ok(json_response(StatusCode::OK, &post))
        }
        (&Method::DELETE, ["posts", id]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            services.posts.delete_post(&token, id).await?;
            Ok(no_content())
        }
        (&Method::GET, ["accounts", id, "posts"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let posts = services.posts.posts_of_account(&token, id).await?;
            Ok(json_response(StatusCode::OK, &posts))
        }

        // Comments
        (&Method::POST, ["posts", id, "comments"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let body: ContentRequest = read_json(req).await?;
            let comment = services
                .comments
                .create_comment(&token, id, &body.content)
                .await?;
            Ok(json_response(StatusCode::CREATED, &comment))
        }
        (&Method::GET, ["posts", id, "comments"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let comments = services.comments.comments_of_post(&token, id).await?;
            Ok(json_response(StatusCode::OK, &comments))
        }
        (&Method::GET, ["posts", id, "comments", "count"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let count = services.comments.comment_count_of_post(&token, id).await?;
            Ok(json_response(StatusCode::OK, &CountResponse { count }))
        }
        (&Method::PUT, ["comments", id]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let body: ContentRequest = read_json(req).await?;
            let comment = services
                .comments
                .update_comment(&token, id, &body.content)
                .await?;
            Ok(json_response(StatusCode::OK, &comment))
        }
        (&Method::DELETE, ["comments", id]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            services.comments.delete_comment(&token, id).await?;
            Ok(no_content())
        }

        // Likes
        (&Method::POST, ["posts", id, "likes"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            services.likes.create_like(&token, id).await?;
            Ok(no_content())
        }
        (&Method::DELETE, ["posts", id, "likes"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            services.likes.delete_like(&token, id).await?;
            Ok(no_content())
        }
        (&Method::GET, ["posts", id, "likes"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let accounts = services.likes.like_accounts_of_post(&token, id).await?;
            Ok(json_response(StatusCode::OK, &accounts))
        }
        (&Method::GET, ["posts", id, "likes", "count"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let count = services.likes.like_count_of_post(&token, id).await?;
            Ok(json_response(StatusCode::OK, &CountResponse { count }))
        }

        // Follows
        (&Method::POST, ["accounts", id, "follow"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            services.follows.create_follow(&token, id).await?;
            Ok(no_content())
        }
        (&Method::DELETE, ["accounts", id, "follow"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            services.follows.delete_follow(&token, id).await?;
            Ok(no_content())
        }
        (&Method::GET, ["accounts", id, "followers"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let accounts = services.follows.followers(&token, id).await?;
            Ok(json_response(StatusCode::OK, &accounts))
        }
        (&Method::GET, ["accounts", id, "followers", "count"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let count = services.follows.follower_count(&token, id).await?;
            Ok(json_response(StatusCode::OK, &CountResponse { count }))
        }
        (&Method::GET, ["accounts", id, "following"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let accounts = services.follows.followings(&token, id).await?;
            Ok(json_response(StatusCode::OK, &accounts))
        }
        (&Method::GET, ["accounts", id, "following", "count"]) => {
            let (token, id) = (bearer(&req)?, parse_id(id)?);
            let count = services.follows.following_count(&token, id).await?;
            Ok(json_response(StatusCode::OK, &CountResponse { count }))
        }

        _ => Err(AgoraError::NotFound(format!("route {} {}", method, path))),
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn bearer(req: &Request<Incoming>) -> Result<String> {
    let header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    extract_token_from_header(header)
        .map(str::to_string)
        .ok_or_else(|| AgoraError::Unauthenticated("missing bearer token".into()))
}

fn parse_id(raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| AgoraError::BadRequest(format!("invalid id: {}", raw)))
}

async fn read_json<T: for<'de> Deserialize<'de>>(req: Request<Incoming>) -> Result<T> {
    let bytes = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| AgoraError::BadRequest(format!("failed to read body: {}", e)))?
        .to_bytes();

    serde_json::from_slice(&bytes)
        .map_err(|e| AgoraError::BadRequest(format!("invalid JSON: {}", e)))
}

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn with_headers(status: StatusCode, body: BoxBody, json: bool) -> Response<BoxBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    if json {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    response
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    with_headers(status, full_body(json), true)
}

fn no_content() -> Response<BoxBody> {
    with_headers(StatusCode::NO_CONTENT, full_body(Bytes::new()), false)
}

/// Render an error as `{"error", "code"}`. Internal details stay in the logs.
pub fn error_response(err: &AgoraError) -> Response<BoxBody> {
    let kind = err.kind();
    let message = match kind {
        ErrorKind::Internal => "internal error".to_string(),
        _ => err.to_string(),
    };

    json_response(
        err.status_code(),
        &ErrorResponse {
            error: message,
            code: kind.as_str(),
        },
    )
}

pub fn timeout_response() -> Response<BoxBody> {
    json_response(
        StatusCode::GATEWAY_TIMEOUT,
        &ErrorResponse {
            error: "request timed out".into(),
            code: "deadline_exceeded",
        },
    )
}

/// CORS preflight response
pub fn preflight_response() -> Response<BoxBody> {
    let mut response = with_headers(StatusCode::NO_CONTENT, full_body(Bytes::new()), false);
    let headers = response.headers_mut();
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response<BoxBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert_eq!(parse_id("-1").unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(parse_id("abc").is_err());
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let response = error_response(&AgoraError::PermissionDenied("post 7".into()));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["code"], "permission_denied");
        assert_eq!(body["error"], "Permission denied: post 7");
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        let response = error_response(&AgoraError::Internal("disk on fire".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["code"], "internal");
        assert_eq!(body["error"], "internal error");
    }

    #[tokio::test]
    async fn test_timeout_response() {
        let response = timeout_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(response).await["code"], "deadline_exceeded");
    }
}
