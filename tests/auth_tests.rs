mod common;

use axum::{
    extract::FromRequestParts,
    http::{HeaderValue, Method, Request, StatusCode, header, request::Parts},
};
use blog_server::{
    AppConfig,
    auth::{
        AuthRejection, AuthUser, SESSION_COOKIE, dummy_password_hash, hash_password, new_session,
        safe_next, session_token, sign_session_token, verify_login, verify_password,
        verify_session_token,
    },
    models::{FormPage, LoginForm},
    repository::Repository,
};
use chrono::{Duration, Utc};
use common::{
    TEST_PASSWORD, TestApp, body_json, body_text, get, location, post_form, set_cookie,
};
use tower::util::ServiceExt;
use uuid::Uuid;

fn request_parts(uri: &str, cookie: Option<&str>) -> Parts {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let (parts, _) = builder.body(axum::body::Body::empty()).unwrap().into_parts();
    parts
}

// --- Token and password primitives ---

#[test]
fn test_session_token_round_trip() {
    let session = new_session(Uuid::new_v4(), Utc::now(), 1);
    let token = sign_session_token(&session, "secret").unwrap();
    assert_eq!(verify_session_token(&token, "secret"), Some(session.id));
}

#[test]
fn test_session_token_rejects_wrong_secret_and_tampering() {
    let session = new_session(Uuid::new_v4(), Utc::now(), 1);
    let token = sign_session_token(&session, "secret").unwrap();

    assert_eq!(verify_session_token(&token, "other-secret"), None);

    // Flip one character in the middle of the signature segment.
    let index = token.len() - 10;
    let original = token.as_bytes()[index];
    let replacement = if original == b'A' { "Q" } else { "A" };
    let mut tampered = token.clone();
    tampered.replace_range(index..index + 1, replacement);
    assert_eq!(verify_session_token(&tampered, "secret"), None);
    assert_eq!(verify_session_token("not-a-token", "secret"), None);
}

#[test]
fn test_session_token_rejects_expired() {
    let session = new_session(Uuid::new_v4(), Utc::now() - Duration::hours(3), 1);
    let token = sign_session_token(&session, "secret").unwrap();
    assert_eq!(verify_session_token(&token, "secret"), None);
}

#[test]
fn test_password_hash_verifies_only_the_original() {
    let hash = hash_password("s3cret!").unwrap();
    assert_ne!(hash, "s3cret!");
    assert!(verify_password("s3cret!", &hash));
    assert!(!verify_password("S3cret!", &hash));
    assert!(!verify_password("s3cret!", "not-a-bcrypt-hash"));
}

#[test]
fn test_session_token_prefers_cookie_over_bearer() {
    let mut headers = axum::http::HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_static("Bearer from-header"),
    );
    assert_eq!(session_token(&headers).as_deref(), Some("from-header"));

    headers.insert(
        header::COOKIE,
        HeaderValue::from_static("csrftoken=x; sessionid=from-cookie"),
    );
    assert_eq!(session_token(&headers).as_deref(), Some("from-cookie"));
}

#[test]
fn test_safe_next_only_follows_local_paths() {
    assert_eq!(safe_next(Some("/drafts")), "/drafts");
    assert_eq!(safe_next(Some("/post/1?x=1")), "/post/1?x=1");
    assert_eq!(safe_next(Some("https://evil.example")), "/");
    assert_eq!(safe_next(Some("//evil.example")), "/");
    assert_eq!(safe_next(Some("/\\evil.example")), "/");
    // Browsers strip these, turning the path into `//evil.example`.
    assert_eq!(safe_next(Some("/\t/evil.example")), "/");
    assert_eq!(safe_next(Some("/\n/evil.example")), "/");
    assert_eq!(safe_next(Some("/\r\n//evil.example")), "/");
    assert_eq!(safe_next(Some("/drafts\u{0}")), "/");
    assert_eq!(safe_next(None), "/");
}

#[test]
fn test_unknown_user_login_still_runs_bcrypt() {
    let dummy = dummy_password_hash();
    assert!(dummy.starts_with("$2b$12$"));
    assert!(!verify_password("", dummy));

    assert!(!verify_login(TEST_PASSWORD, None));
    let hash = bcrypt::hash(TEST_PASSWORD, 4).unwrap();
    assert!(verify_login(TEST_PASSWORD, Some(&hash)));
    assert!(!verify_login("wrong", Some(&hash)));
}

// --- AuthUser extractor ---

#[tokio::test]
async fn test_extractor_resolves_valid_session() {
    let app = TestApp::new();
    let user = app.user("alice", true, true).await;
    let cookie = app.login_cookie(&user).await;

    let mut parts = request_parts("/drafts", Some(&cookie));
    let auth = AuthUser::from_request_parts(&mut parts, &app.state())
        .await
        .unwrap();
    assert_eq!(auth.id, user.id);
    assert_eq!(auth.username, "alice");
    assert!(auth.is_staff);
}

#[tokio::test]
async fn test_extractor_without_token_asks_for_login() {
    let app = TestApp::new();
    let mut parts = request_parts("/drafts", None);

    let result = AuthUser::from_request_parts(&mut parts, &app.state()).await;
    match result {
        Err(AuthRejection::LoginRequired { next }) => assert_eq!(next, "/drafts"),
        other => panic!("expected LoginRequired, got {:?}", other),
    }
}

#[tokio::test]
async fn test_extractor_rejects_deleted_session() {
    let app = TestApp::new();
    let user = app.user("alice", true, false).await;
    let session = app
        .repo
        .create_session(new_session(user.id, Utc::now(), 1))
        .await
        .unwrap();
    let token = sign_session_token(&session, &app.config.session_secret).unwrap();
    app.repo.delete_session(session.id).await.unwrap();

    let cookie = format!("{SESSION_COOKIE}={token}");
    let mut parts = request_parts("/", Some(&cookie));
    let result = AuthUser::from_request_parts(&mut parts, &app.state()).await;
    assert!(matches!(result, Err(AuthRejection::LoginRequired { .. })));
}

#[tokio::test]
async fn test_extractor_rejects_inactive_user() {
    let app = TestApp::new();
    let user = app.user("dormant", false, false).await;
    let cookie = app.login_cookie(&user).await;

    let mut parts = request_parts("/", Some(&cookie));
    let result = AuthUser::from_request_parts(&mut parts, &app.state()).await;
    assert!(matches!(result, Err(AuthRejection::LoginRequired { .. })));
}

#[tokio::test]
async fn test_extractor_rejects_token_signed_with_other_secret() {
    let app = TestApp::new();
    let user = app.user("alice", true, false).await;
    let session = app
        .repo
        .create_session(new_session(user.id, Utc::now(), 1))
        .await
        .unwrap();
    let forged = sign_session_token(&session, "attacker-secret").unwrap();

    let cookie = format!("{SESSION_COOKIE}={forged}");
    let mut parts = request_parts("/", Some(&cookie));
    let result = AuthUser::from_request_parts(&mut parts, &app.state()).await;
    assert!(matches!(result, Err(AuthRejection::LoginRequired { .. })));
}

// --- Login gate ---

#[tokio::test]
async fn test_protected_routes_redirect_to_login_with_next() {
    let app = TestApp::new();

    let response = app.router().oneshot(get("/drafts", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login?next=%2Fdrafts");

    let response = app
        .router()
        .oneshot(post_form("/post/new", None, "title=a&text=b"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/login?next="));
}

// --- Login and logout ---

#[tokio::test]
async fn test_login_sets_cookie_and_redirects_to_next() {
    let app = TestApp::new();
    app.user("alice", true, false).await;

    let response = app
        .router()
        .oneshot(post_form(
            "/login",
            None,
            &format!("username=alice&password={TEST_PASSWORD}&next=%2Fdrafts"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/drafts");
    let cookie = set_cookie(&response).unwrap();
    assert!(cookie.starts_with(&format!("{SESSION_COOKIE}=")));
    assert!(cookie.contains("HttpOnly"));
    assert!(!cookie.contains("Secure"));
    assert_eq!(app.repo.session_count().await, 1);

    // The issued cookie opens protected views.
    let session_pair = cookie.split(';').next().unwrap().to_string();
    let response = app
        .router()
        .oneshot(get("/drafts", Some(&session_pair)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_ignores_offsite_next() {
    let app = TestApp::new();
    app.user("alice", true, false).await;

    let response = app
        .router()
        .oneshot(post_form(
            "/login",
            None,
            &format!("username=alice&password={TEST_PASSWORD}&next=https%3A%2F%2Fevil.example"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_login_with_wrong_password_is_rejected() {
    let app = TestApp::new();
    app.user("alice", true, false).await;

    let response = app
        .router()
        .oneshot(post_form("/login", None, "username=alice&password=wrong"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response).is_none());
    assert_eq!(body_text(response).await, "Invalid logged in details supplied");
    assert_eq!(app.repo.session_count().await, 0);
}

#[tokio::test]
async fn test_login_with_unknown_user_is_rejected() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(post_form("/login", None, "username=ghost&password=whatever"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response).is_none());
    assert_eq!(body_text(response).await, "Invalid logged in details supplied");
    assert_eq!(app.repo.session_count().await, 0);
}

#[tokio::test]
async fn test_login_ignores_next_hidden_behind_control_characters() {
    let app = TestApp::new();
    app.user("alice", true, false).await;

    let response = app
        .router()
        .oneshot(post_form(
            "/login",
            None,
            &format!("username=alice&password={TEST_PASSWORD}&next=%2F%09%2Fevil.example"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_login_form_carries_next_from_query() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(get("/login?next=%2Fdrafts", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page: FormPage<LoginForm> = body_json(response).await;
    assert_eq!(page.form.next.as_deref(), Some("/drafts"));
    assert!(page.errors.is_empty());

    let response = app.router().oneshot(get("/login", None)).await.unwrap();
    let page: FormPage<LoginForm> = body_json(response).await;
    assert_eq!(page.form.next, None);
}

#[tokio::test]
async fn test_login_inactive_account_gets_no_session() {
    let app = TestApp::new();
    app.user("dormant", false, false).await;

    let response = app
        .router()
        .oneshot(post_form(
            "/login",
            None,
            &format!("username=dormant&password={TEST_PASSWORD}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookie(&response).is_none());
    assert_eq!(body_text(response).await, "ACCOUNT NOT ACTIVE!");
    assert_eq!(app.repo.session_count().await, 0);
}

#[tokio::test]
async fn test_login_cookie_is_secure_in_production() {
    let app = TestApp::with_config(AppConfig {
        env: blog_server::Env::Production,
        ..AppConfig::default()
    });
    app.user("alice", true, false).await;

    let response = app
        .router()
        .oneshot(post_form(
            "/login",
            None,
            &format!("username=alice&password={TEST_PASSWORD}"),
        ))
        .await
        .unwrap();
    assert!(set_cookie(&response).unwrap().contains("Secure"));
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = TestApp::new();
    let user = app.user("alice", true, false).await;
    let cookie = app.login_cookie(&user).await;
    assert_eq!(app.repo.session_count().await, 1);

    let response = app
        .router()
        .oneshot(post_form("/logout", Some(&cookie), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    assert!(set_cookie(&response).unwrap().contains("Max-Age=0"));
    assert_eq!(app.repo.session_count().await, 0);

    // The old cookie no longer authenticates.
    let response = app
        .router()
        .oneshot(get("/drafts", Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_logout_requires_login() {
    let app = TestApp::new();
    let response = app.router().oneshot(get("/logout", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login?next=%2Flogout");
}
