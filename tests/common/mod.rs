#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use blog_server::{
    AppConfig, AppState, InMemoryRepository, MockStorageService, create_router,
    auth::{SESSION_COOKIE, new_session, sign_session_token},
    models::{Post, User},
    repository::Repository,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Everything a test needs to drive the router and inspect the stores behind it.
pub struct TestApp {
    pub repo: Arc<InMemoryRepository>,
    pub storage: MockStorageService,
    pub config: AppConfig,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self {
            repo: Arc::new(InMemoryRepository::new()),
            storage: MockStorageService::new(),
            config,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            repo: self.repo.clone(),
            storage: Arc::new(self.storage.clone()),
            config: self.config.clone(),
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state())
    }

    /// Seeds an account with `TEST_PASSWORD`, hashed at the lowest bcrypt cost.
    pub async fn user(&self, username: &str, is_active: bool, is_staff: bool) -> User {
        let password_hash = bcrypt::hash(TEST_PASSWORD, 4).unwrap();
        self.repo
            .insert_user(User {
                id: Uuid::new_v4(),
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password_hash,
                is_active,
                is_staff,
                date_joined: Utc::now(),
                ..User::default()
            })
            .await
    }

    /// Opens a session for `user` directly in the store and returns the cookie
    /// header value a browser would send.
    pub async fn login_cookie(&self, user: &User) -> String {
        let session = new_session(user.id, Utc::now(), self.config.session_ttl_hours);
        let session = self.repo.create_session(session).await.unwrap();
        let token = sign_session_token(&session, &self.config.session_secret).unwrap();
        format!("{SESSION_COOKIE}={token}")
    }

    pub async fn post(
        &self,
        author: &User,
        title: &str,
        published_date: Option<DateTime<Utc>>,
    ) -> Post {
        self.repo
            .insert_post(Post {
                author_id: author.id,
                title: title.to_string(),
                text: format!("{title} body"),
                created_date: Utc::now(),
                published_date,
                ..Post::default()
            })
            .await
    }
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_form(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn location<B>(response: &Response<B>) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

pub fn set_cookie<B>(response: &Response<B>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json<T: DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
