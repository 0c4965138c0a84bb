use crate::{
    AppState,
    auth::{
        self, AuthUser, expired_session_cookie, new_session, safe_next, session_cookie,
        sign_session_token,
    },
    error::{AppError, AppResult, RepoError},
    forms::{DUPLICATE_USERNAME, FormErrors, UploadedFile},
    models::{
        AccountView, Comment, CommentForm, FormPage, LoginForm, LoginQuery, NewProfile, NewUser, Post,
        PostDetail, PostForm, RegistrationPage, UserForm, UserProfileInfoForm,
    },
};
use axum::{
    Form, Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use uuid::Uuid;

const INVALID_LOGIN_MESSAGE: &str = "Invalid logged in details supplied";
const INACTIVE_ACCOUNT_MESSAGE: &str = "ACCOUNT NOT ACTIVE!";

fn post_detail_url(pk: i64) -> String {
    format!("/post/{pk}")
}

fn invalid_form<F: serde::Serialize>(form: F, errors: FormErrors) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(FormPage::with_errors(form, errors)),
    )
        .into_response()
}

async fn find_post(state: &AppState, pk: i64) -> AppResult<Post> {
    state
        .repo
        .get_post(pk)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("post {pk}")))
}

async fn find_modifiable_post(state: &AppState, user: &AuthUser, pk: i64) -> AppResult<Post> {
    let post = find_post(state, pk).await?;
    if !user.may_modify(&post, &state.config) {
        tracing::warn!(user = %user.username, post = pk, "refused change to another author's post");
        return Err(AppError::Forbidden);
    }
    Ok(post)
}

// --- Post Handlers ---

/// post_list
///
/// [Public Route] Published posts, newest publication first. Posts scheduled for a
/// future date stay hidden until that date passes.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Published posts", body = [Post]))
)]
pub async fn post_list(State(state): State<AppState>) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(state.repo.list_published_posts(Utc::now()).await?))
}

/// post_detail
///
/// [Public Route] One post with its comments. Anonymous readers only see published
/// posts and approved comments; logged-in users see drafts and the moderation queue.
#[utoipa::path(
    get,
    path = "/post/{pk}",
    params(("pk" = i64, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Found", body = PostDetail),
        (status = 404, description = "Not Found")
    )
)]
pub async fn post_detail(
    viewer: Option<AuthUser>,
    State(state): State<AppState>,
    Path(pk): Path<i64>,
) -> AppResult<Json<PostDetail>> {
    let post = find_post(&state, pk).await?;

    if viewer.is_none() && !post.is_published_at(Utc::now()) {
        return Err(AppError::NotFound(format!("post {pk}")));
    }

    let comments: Vec<Comment> = state
        .repo
        .get_comments(pk)
        .await?
        .into_iter()
        .filter(|comment| viewer.is_some() || comment.approved_comment)
        .collect();

    Ok(Json(PostDetail { post, comments }))
}

/// post_new_form
///
/// [Authenticated Route] The empty post form.
#[utoipa::path(
    get,
    path = "/post/new",
    responses((status = 200, description = "Empty form", body = FormPage<PostForm>))
)]
pub async fn post_new_form(_user: AuthUser) -> Json<FormPage<PostForm>> {
    Json(FormPage::new(PostForm::default()))
}

/// create_post
///
/// [Authenticated Route] Creates a draft authored by the current user and redirects
/// to its detail view.
#[utoipa::path(
    post,
    path = "/post/new",
    request_body(content = PostForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Created; redirects to the post"),
        (status = 422, description = "Form errors", body = FormPage<PostForm>)
    )
)]
pub async fn create_post(
    user: AuthUser,
    State(state): State<AppState>,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    let cleaned = match form.clean() {
        Ok(cleaned) => cleaned,
        Err(errors) => return Ok(invalid_form(form, errors)),
    };

    let post = state.repo.create_post(user.id, cleaned).await?;
    tracing::info!(post = post.id, author = %user.username, "post created");
    Ok(Redirect::to(&post_detail_url(post.id)).into_response())
}

/// post_edit_form
///
/// [Authenticated Route] The post form pre-filled with the stored values.
#[utoipa::path(
    get,
    path = "/post/{pk}/edit",
    params(("pk" = i64, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Filled form", body = FormPage<PostForm>),
        (status = 404, description = "Not Found")
    )
)]
pub async fn post_edit_form(
    user: AuthUser,
    State(state): State<AppState>,
    Path(pk): Path<i64>,
) -> AppResult<Json<FormPage<PostForm>>> {
    let post = find_modifiable_post(&state, &user, pk).await?;
    Ok(Json(FormPage::new(PostForm::from(&post))))
}

/// update_post
///
/// [Authenticated Route] Replaces title and text. The original author is kept.
#[utoipa::path(
    post,
    path = "/post/{pk}/edit",
    params(("pk" = i64, Path, description = "Post ID")),
    request_body(content = PostForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Updated; redirects to the post"),
        (status = 404, description = "Not Found"),
        (status = 422, description = "Form errors", body = FormPage<PostForm>)
    )
)]
pub async fn update_post(
    user: AuthUser,
    State(state): State<AppState>,
    Path(pk): Path<i64>,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    find_modifiable_post(&state, &user, pk).await?;

    let cleaned = match form.clean() {
        Ok(cleaned) => cleaned,
        Err(errors) => return Ok(invalid_form(form, errors)),
    };

    let post = state
        .repo
        .update_post(pk, cleaned)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("post {pk}")))?;
    Ok(Redirect::to(&post_detail_url(post.id)).into_response())
}

/// post_delete_confirm
///
/// [Authenticated Route] The post about to be deleted, for confirmation.
#[utoipa::path(
    get,
    path = "/post/{pk}/remove",
    params(("pk" = i64, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Post to delete", body = Post),
        (status = 404, description = "Not Found")
    )
)]
pub async fn post_delete_confirm(
    user: AuthUser,
    State(state): State<AppState>,
    Path(pk): Path<i64>,
) -> AppResult<Json<Post>> {
    Ok(Json(find_modifiable_post(&state, &user, pk).await?))
}

/// delete_post
///
/// [Authenticated Route] Deletes the post with its comments and returns to the list.
#[utoipa::path(
    post,
    path = "/post/{pk}/remove",
    params(("pk" = i64, Path, description = "Post ID")),
    responses(
        (status = 303, description = "Deleted; redirects to the post list"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_post(
    user: AuthUser,
    State(state): State<AppState>,
    Path(pk): Path<i64>,
) -> AppResult<Redirect> {
    find_modifiable_post(&state, &user, pk).await?;

    if !state.repo.delete_post(pk).await? {
        return Err(AppError::NotFound(format!("post {pk}")));
    }
    tracing::info!(post = pk, user = %user.username, "post deleted");
    Ok(Redirect::to("/"))
}

/// post_draft_list
///
/// [Authenticated Route] Unpublished posts, oldest first.
#[utoipa::path(
    get,
    path = "/drafts",
    responses((status = 200, description = "Drafts", body = [Post]))
)]
pub async fn post_draft_list(
    _user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(state.repo.list_draft_posts().await?))
}

/// post_publish
///
/// [Authenticated Route] Stamps the post with the current time, taking it out of
/// the draft list.
#[utoipa::path(
    post,
    path = "/post/{pk}/publish",
    params(("pk" = i64, Path, description = "Post ID")),
    responses(
        (status = 303, description = "Published; redirects to the post"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn post_publish(
    user: AuthUser,
    State(state): State<AppState>,
    Path(pk): Path<i64>,
) -> AppResult<Redirect> {
    find_modifiable_post(&state, &user, pk).await?;

    let post = state
        .repo
        .publish_post(pk, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("post {pk}")))?;
    tracing::info!(post = post.id, user = %user.username, "post published");
    Ok(Redirect::to(&post_detail_url(post.id)))
}

// --- Comment Handlers ---

/// comment_form
///
/// [Authenticated Route] The empty comment form for an existing post.
#[utoipa::path(
    get,
    path = "/post/{pk}/comment",
    params(("pk" = i64, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Empty form", body = FormPage<CommentForm>),
        (status = 404, description = "Not Found")
    )
)]
pub async fn comment_form(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(pk): Path<i64>,
) -> AppResult<Json<FormPage<CommentForm>>> {
    find_post(&state, pk).await?;
    Ok(Json(FormPage::new(CommentForm::default())))
}

/// add_comment_to_post
///
/// [Authenticated Route] Attaches an unapproved comment to the post in the path.
#[utoipa::path(
    post,
    path = "/post/{pk}/comment",
    params(("pk" = i64, Path, description = "Post ID")),
    request_body(content = CommentForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Added; redirects to the post"),
        (status = 404, description = "Not Found"),
        (status = 422, description = "Form errors", body = FormPage<CommentForm>)
    )
)]
pub async fn add_comment_to_post(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(pk): Path<i64>,
    Form(form): Form<CommentForm>,
) -> AppResult<Response> {
    let post = find_post(&state, pk).await?;

    let cleaned = match form.clean() {
        Ok(cleaned) => cleaned,
        Err(errors) => return Ok(invalid_form(form, errors)),
    };

    let comment = state.repo.add_comment(post.id, cleaned).await?;
    tracing::info!(comment = comment.id, post = post.id, "comment awaiting approval");
    Ok(Redirect::to(&post_detail_url(post.id)).into_response())
}

/// comment_approve
///
/// [Authenticated Route] Marks the comment approved and returns to its post.
#[utoipa::path(
    post,
    path = "/comment/{pk}/approve",
    params(("pk" = i64, Path, description = "Comment ID")),
    responses(
        (status = 303, description = "Approved; redirects to the post"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn comment_approve(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(pk): Path<i64>,
) -> AppResult<Redirect> {
    let comment = state
        .repo
        .approve_comment(pk)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("comment {pk}")))?;
    Ok(Redirect::to(&post_detail_url(comment.post_id)))
}

/// comment_remove
///
/// [Authenticated Route] Deletes the comment and returns to its post.
#[utoipa::path(
    post,
    path = "/comment/{pk}/remove",
    params(("pk" = i64, Path, description = "Comment ID")),
    responses(
        (status = 303, description = "Removed; redirects to the post"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn comment_remove(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(pk): Path<i64>,
) -> AppResult<Redirect> {
    let comment = state
        .repo
        .delete_comment(pk)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("comment {pk}")))?;
    Ok(Redirect::to(&post_detail_url(comment.post_id)))
}

// --- Registration, Login, Logout ---

/// registration_form
///
/// [Public Route] Both empty registration forms.
#[utoipa::path(
    get,
    path = "/register",
    responses((status = 200, description = "Empty forms", body = RegistrationPage))
)]
pub async fn registration_form() -> Json<RegistrationPage> {
    Json(RegistrationPage::default())
}

struct RegistrationSubmission {
    user_form: UserForm,
    profile_form: UserProfileInfoForm,
    picture: Option<UploadedFile>,
}

async fn read_registration(mut multipart: Multipart) -> AppResult<RegistrationSubmission> {
    let mut submission = RegistrationSubmission {
        user_form: UserForm::default(),
        profile_form: UserProfileInfoForm::default(),
        picture: None,
    };

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "profile_picture" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let content_type = field.content_type().unwrap_or_default().to_string();
            let data = field.bytes().await?;
            // Browsers send an empty part when no file was chosen.
            if !file_name.is_empty() && !data.is_empty() {
                submission.picture = Some(UploadedFile {
                    file_name,
                    content_type,
                    data,
                });
            }
            continue;
        }

        let value = field.text().await?;
        match name.as_str() {
            "username" => submission.user_form.username = value,
            "first_name" => submission.user_form.first_name = value,
            "last_name" => submission.user_form.last_name = value,
            "email" => submission.user_form.email = value,
            "password" => submission.user_form.password = value,
            "botcatcher" => submission.user_form.botcatcher = value,
            "portfolio_site" => submission.profile_form.portfolio_site = value,
            _ => {}
        }
    }

    Ok(submission)
}

fn registration_rejected(
    submission: &RegistrationSubmission,
    user_form_errors: FormErrors,
    profile_form_errors: FormErrors,
) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(RegistrationPage {
            user_form: submission.user_form.without_password(),
            profile_form: submission.profile_form.clone(),
            user_form_errors,
            profile_form_errors,
            registered: false,
        }),
    )
        .into_response()
}

fn duplicate_username() -> FormErrors {
    let mut errors = FormErrors::default();
    errors.add("username", DUPLICATE_USERNAME);
    errors
}

/// register
///
/// [Public Route] Validates the account and profile forms together; nothing is stored
/// unless both pass. The optional picture goes to object storage, then user and
/// profile are inserted in a single transaction. A failed insert removes the picture.
#[utoipa::path(
    post,
    path = "/register",
    request_body(content = UserForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Registered", body = RegistrationPage),
        (status = 422, description = "Form errors", body = RegistrationPage)
    )
)]
pub async fn register(State(state): State<AppState>, multipart: Multipart) -> AppResult<Response> {
    let submission = read_registration(multipart).await?;

    let user_result = submission.user_form.clean();
    let mut profile_errors = FormErrors::default();
    let profile_result = submission.profile_form.clean();
    if let Err(errors) = &profile_result {
        profile_errors.merge(errors.clone());
    }
    if let Some(Err(errors)) = submission.picture.as_ref().map(UploadedFile::validate_image) {
        profile_errors.merge(errors);
    }

    let (user_form, profile_form) = match (user_result, profile_result) {
        (Ok(user_form), Ok(profile_form)) if profile_errors.is_empty() => (user_form, profile_form),
        (user_result, _) => {
            let user_errors = user_result.err().unwrap_or_default();
            tracing::info!(?user_errors, ?profile_errors, "registration rejected");
            return Ok(registration_rejected(&submission, user_errors, profile_errors));
        }
    };

    if state.repo.get_user_by_username(&user_form.username).await?.is_some() {
        return Ok(registration_rejected(
            &submission,
            duplicate_username(),
            FormErrors::default(),
        ));
    }

    let password = user_form.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let profile_picture = match &submission.picture {
        Some(picture) => {
            let extension = picture.extension().unwrap_or_else(|| "bin".to_string());
            let key = format!("profile_pics/{}.{}", Uuid::new_v4(), extension);
            let stored = state
                .storage
                .put_object(&key, &picture.content_type, picture.data.to_vec())
                .await
                .map_err(AppError::Internal)?;
            Some(stored)
        }
        None => None,
    };

    let new_user = NewUser {
        username: user_form.username,
        first_name: user_form.first_name,
        last_name: user_form.last_name,
        email: user_form.email,
        password_hash,
    };
    let new_profile = NewProfile {
        portfolio_site: Some(profile_form.portfolio_site).filter(|site| !site.is_empty()),
        profile_picture,
    };

    let stored_picture = new_profile.profile_picture.clone();
    let registered = state.repo.register_user(new_user, new_profile).await;
    if let (Err(_), Some(key)) = (&registered, &stored_picture) {
        if let Err(e) = state.storage.delete_object(key).await {
            tracing::warn!(key = %key, "orphaned profile picture left in storage: {}", e);
        }
    }

    let (user, _profile) = match registered {
        Ok(created) => created,
        // Lost a race with a concurrent registration of the same username.
        Err(RepoError::Constraint(_)) => {
            return Ok(registration_rejected(
                &submission,
                duplicate_username(),
                FormErrors::default(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(user = %user.id, username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegistrationPage {
            registered: true,
            ..RegistrationPage::default()
        }),
    )
        .into_response())
}

/// login_form
///
/// [Public Route] The empty login form, carrying over the `next` target the login
/// gate put in the query string.
#[utoipa::path(
    get,
    path = "/login",
    params(LoginQuery),
    responses((status = 200, description = "Empty form", body = FormPage<LoginForm>))
)]
pub async fn login_form(Query(query): Query<LoginQuery>) -> Json<FormPage<LoginForm>> {
    Json(FormPage::new(LoginForm {
        next: query.next.filter(|next| !next.is_empty()),
        ..LoginForm::default()
    }))
}

/// user_login
///
/// [Public Route] Checks the credentials, opens a server-side session and hands the
/// client a signed token in the `sessionid` cookie. Failures answer in plain text.
#[utoipa::path(
    post,
    path = "/login",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Logged in; redirects to `next` or the post list"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account not active")
    )
)]
pub async fn user_login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let username = form.username.trim().to_string();

    let user = state.repo.get_user_by_username(&username).await?;
    let password = form.password.clone();
    let password_hash = user.as_ref().map(|user| user.password_hash.clone());
    let matches = tokio::task::spawn_blocking(move || {
        auth::verify_login(&password, password_hash.as_deref())
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;
    let authenticated = user.filter(|_| matches);

    let Some(user) = authenticated else {
        tracing::warn!(username = %username, "failed login attempt");
        return Ok((StatusCode::UNAUTHORIZED, INVALID_LOGIN_MESSAGE).into_response());
    };

    if !user.is_active {
        tracing::warn!(username = %username, "login refused for inactive account");
        return Ok((StatusCode::FORBIDDEN, INACTIVE_ACCOUNT_MESSAGE).into_response());
    }

    let session = new_session(user.id, Utc::now(), state.config.session_ttl_hours);
    let session = state.repo.create_session(session).await?;
    let token = sign_session_token(&session, &state.config.session_secret)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let cookie = session_cookie(
        &token,
        state.config.session_ttl_hours * 3600,
        state.config.secure_cookies(),
    );

    tracing::info!(username = %username, session = %session.id, "user logged in");
    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::to(safe_next(form.next.as_deref())),
    )
        .into_response())
}

/// user_logout
///
/// [Authenticated Route] Deletes the server-side session and clears the cookie.
#[utoipa::path(
    post,
    path = "/logout",
    responses((status = 303, description = "Logged out; redirects to the post list"))
)]
pub async fn user_logout(user: AuthUser, State(state): State<AppState>) -> AppResult<Response> {
    state.repo.delete_session(user.session_id).await?;
    tracing::info!(username = %user.username, "user logged out");

    Ok((
        [(
            header::SET_COOKIE,
            expired_session_cookie(state.config.secure_cookies()),
        )],
        Redirect::to("/"),
    )
        .into_response())
}

/// get_me
///
/// [Authenticated Route] The current account with its profile.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Account", body = AccountView))
)]
pub async fn get_me(user: AuthUser, State(state): State<AppState>) -> AppResult<Json<AccountView>> {
    let account = state
        .repo
        .get_user(user.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", user.id)))?;
    let profile = state.repo.get_profile(user.id).await?;

    let mut profile_picture_url = None;
    if let Some(key) = profile.as_ref().and_then(|p| p.profile_picture.as_deref()) {
        match state.storage.get_presigned_download_url(key).await {
            Ok(url) => profile_picture_url = Some(url),
            Err(e) => tracing::warn!("could not sign profile picture url: {}", e),
        }
    }

    Ok(Json(AccountView {
        user: account,
        profile,
        profile_picture_url,
    }))
}
