use crate::{AppState, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::get,
};

/// Public Router Module
///
/// Endpoints reachable without a session. The post detail view is shared with
/// logged-in users, who additionally see drafts and unapproved comments.
pub fn public_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for monitoring and load balancers.
        .route("/health", get(|| async { "ok" }))
        // GET /
        // Published posts, newest publication first.
        .route("/", get(handlers::post_list))
        // GET /post/{pk}
        .route("/post/{pk}", get(handlers::post_detail))
        // GET|POST /register
        // Multipart registration, bounded so an oversized picture is refused before
        // it is buffered.
        .route(
            "/register",
            get(handlers::registration_form)
                .post(handlers::register)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        // GET|POST /login
        .route("/login", get(handlers::login_form).post(handlers::user_login))
}
