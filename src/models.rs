use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::forms::FormErrors;

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// Account record in the `users` table. The password hash never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    // Inactive accounts can never log in.
    pub is_active: bool,
    pub is_staff: bool,
    #[ts(type = "string")]
    pub date_joined: DateTime<Utc>,
}

/// UserProfileInfo
///
/// One-to-one extension of `User`, created in the same transaction as the account.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct UserProfileInfo {
    pub id: i64,
    pub user_id: Uuid,
    pub portfolio_site: Option<String>,
    // Object storage key of the uploaded picture.
    pub profile_picture: Option<String>,
}

/// Post
///
/// A blog post. `published_date` is null while the post is a draft.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Post {
    pub id: i64,
    pub author_id: Uuid,
    pub title: String,
    pub text: String,
    #[ts(type = "string")]
    pub created_date: DateTime<Utc>,
    #[ts(type = "string | null")]
    pub published_date: Option<DateTime<Utc>>,
}

impl Post {
    pub fn is_draft(&self) -> bool {
        self.published_date.is_none()
    }

    /// True once the publication timestamp has been reached.
    pub fn is_published_at(&self, now: DateTime<Utc>) -> bool {
        self.published_date.is_some_and(|published| published <= now)
    }
}

/// Comment
///
/// A reader comment on a post. The author is free text, not an account.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author: String,
    pub text: String,
    #[ts(type = "string")]
    pub created_date: DateTime<Utc>,
    pub approved_comment: bool,
}

/// Session
///
/// Server-side login session. The signed token handed to the client only names the id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// NewUser
///
/// Validated account fields ready for insertion; the password is already hashed.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
}

/// NewProfile
///
/// Validated profile fields ready for insertion alongside a `NewUser`.
#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    pub portfolio_site: Option<String>,
    pub profile_picture: Option<String>,
}

// --- Form Payloads (Input Schemas) ---

/// PostForm
///
/// Title and body of a post, as submitted from the create and edit forms.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(default)]
#[ts(export)]
pub struct PostForm {
    pub title: String,
    pub text: String,
}

impl From<&Post> for PostForm {
    fn from(post: &Post) -> Self {
        Self {
            title: post.title.clone(),
            text: post.text.clone(),
        }
    }
}

/// CommentForm
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(default)]
#[ts(export)]
pub struct CommentForm {
    pub author: String,
    pub text: String,
}

/// UserForm
///
/// Account half of the registration submission. `botcatcher` is a hidden honeypot
/// field that humans leave empty.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default, PartialEq)]
#[serde(default)]
pub struct UserForm {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub botcatcher: String,
}

impl UserForm {
    /// Copy safe to echo back to the client.
    pub fn without_password(&self) -> Self {
        Self {
            password: String::new(),
            ..self.clone()
        }
    }
}

/// UserProfileInfoForm
///
/// Profile half of the registration submission. The picture arrives as a file part
/// and is carried separately.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default, PartialEq)]
#[serde(default)]
pub struct UserProfileInfoForm {
    pub portfolio_site: String,
}

/// LoginForm
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    /// Local path to return to after a successful login.
    pub next: Option<String>,
}

/// Query string of `GET /login`, as written by the login gate.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct LoginQuery {
    /// Local path to return to after a successful login.
    pub next: Option<String>,
}

// --- Response Documents (Output Schemas) ---

/// PostDetail
///
/// A post together with the comments visible to the requester.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PostDetail {
    pub post: Post,
    pub comments: Vec<Comment>,
}

/// FormPage
///
/// A form's current values with its field errors, returned for GET requests and
/// for rejected submissions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct FormPage<F> {
    pub form: F,
    pub errors: FormErrors,
}

impl<F> FormPage<F> {
    pub fn new(form: F) -> Self {
        Self {
            form,
            errors: FormErrors::default(),
        }
    }

    pub fn with_errors(form: F, errors: FormErrors) -> Self {
        Self { form, errors }
    }
}

/// RegistrationPage
///
/// Both registration forms with their errors and the success flag.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct RegistrationPage {
    pub user_form: UserForm,
    pub profile_form: UserProfileInfoForm,
    pub user_form_errors: FormErrors,
    pub profile_form_errors: FormErrors,
    pub registered: bool,
}

/// AccountView
///
/// The authenticated user's account with profile, and a temporary picture URL.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountView {
    pub user: User,
    pub profile: Option<UserProfileInfo>,
    pub profile_picture_url: Option<String>,
}
