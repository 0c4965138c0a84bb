use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Authoring, publishing, moderation and account endpoints. Every handler here
/// also takes an `AuthUser`, resolved once more from the same session.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Posts ---
        .route(
            "/post/new",
            get(handlers::post_new_form).post(handlers::create_post),
        )
        .route(
            "/post/{pk}/edit",
            get(handlers::post_edit_form).post(handlers::update_post),
        )
        .route(
            "/post/{pk}/remove",
            get(handlers::post_delete_confirm).post(handlers::delete_post),
        )
        // POST /post/{pk}/publish
        // Stamps the publication date with the current time.
        .route("/post/{pk}/publish", post(handlers::post_publish))
        // GET /drafts
        .route("/drafts", get(handlers::post_draft_list))
        // --- Comments ---
        .route(
            "/post/{pk}/comment",
            get(handlers::comment_form).post(handlers::add_comment_to_post),
        )
        // Approval and removal are open to any logged-in user.
        .route("/comment/{pk}/approve", post(handlers::comment_approve))
        .route("/comment/{pk}/remove", post(handlers::comment_remove))
        // --- Account ---
        .route(
            "/logout",
            get(handlers::user_logout).post(handlers::user_logout),
        )
        .route("/me", get(handlers::get_me))
}
