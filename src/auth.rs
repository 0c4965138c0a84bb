use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    models::{Post, Session},
    repository::RepositoryState,
};

/// Name of the cookie carrying the signed session token.
pub const SESSION_COOKIE: &str = "sessionid";

/// Path of the login view unauthenticated requests are sent to.
pub const LOGIN_URL: &str = "/login";

/// Claims
///
/// Payload of the signed session token. The subject is the id of a server-side
/// `Session` row, so revoking the row invalidates the token immediately.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Session id.
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
}

/// Builds a new session for `user_id` starting at `now`.
pub fn new_session(user_id: Uuid, now: DateTime<Utc>, ttl_hours: i64) -> Session {
    Session {
        id: Uuid::new_v4(),
        user_id,
        created_at: now,
        expires_at: now + Duration::hours(ttl_hours),
    }
}

/// Signs a token naming `session`, expiring together with it.
pub fn sign_session_token(
    session: &Session,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: session.id,
        iat: session.created_at.timestamp().max(0) as usize,
        exp: session.expires_at.timestamp().max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verifies signature and expiry, returning the session id the token names.
pub fn verify_session_token(token: &str, secret: &str) -> Option<Uuid> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .ok()
    .map(|data| data.claims.sub)
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

/// False for a wrong password and for a malformed stored hash alike.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    bcrypt::verify(password, password_hash).unwrap_or(false)
}

lazy_static! {
    // Checked in place of a real hash when the username is unknown, so both
    // outcomes of a login attempt cost one bcrypt verification.
    static ref DUMMY_PASSWORD_HASH: String =
        hash_password("no account has this password").unwrap_or_default();
}

/// The stand-in hash used for unknown usernames.
pub fn dummy_password_hash() -> &'static str {
    &DUMMY_PASSWORD_HASH
}

/// Checks a login attempt. With no stored hash the password is still verified
/// against `dummy_password_hash` and the attempt fails.
pub fn verify_login(password: &str, password_hash: Option<&str>) -> bool {
    match password_hash {
        Some(hash) => verify_password(password, hash),
        None => {
            verify_password(password, dummy_password_hash());
            false
        }
    }
}

/// `Set-Cookie` value establishing the session.
pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that makes the browser drop the session cookie.
pub fn expired_session_cookie(secure: bool) -> String {
    session_cookie("", 0, secure)
}

/// Reads the session token from the `sessionid` cookie, falling back to an
/// `Authorization: Bearer` header for non-browser clients.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
    })
}

/// Only local absolute paths are followed after login; anything else goes home.
///
/// Browsers drop tabs and newlines from URLs, so `/\t/host` would be followed
/// as `//host`. Control characters are rejected outright.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(|c| c.is_ascii_control()) =>
        {
            path
        }
        _ => "/",
    }
}

/// AuthUser
///
/// The resolved identity of a request carrying a valid, unexpired session for an
/// active account.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub is_staff: bool,
    pub session_id: Uuid,
}

impl AuthUser {
    /// Whether this user may edit, delete or publish `post`. Without ownership
    /// enforcement every logged-in user may.
    pub fn may_modify(&self, post: &Post, config: &AppConfig) -> bool {
        !config.enforce_ownership || self.is_staff || post.author_id == self.id
    }
}

/// AuthRejection
///
/// Why a request could not be authenticated.
#[derive(Debug)]
pub enum AuthRejection {
    /// No usable session: send the client to the login view, remembering where it was.
    LoginRequired { next: String },
    /// The session store could not be consulted.
    Internal,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            AuthRejection::LoginRequired { next } => {
                let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
                Redirect::to(&format!("{LOGIN_URL}?next={encoded}")).into_response()
            }
            AuthRejection::Internal => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

/// AuthUser Extractor Implementation
///
/// 1. Read the token from the cookie or bearer header.
/// 2. Verify its signature and expiry.
/// 3. Load the server-side session and check it has not expired or been deleted.
/// 4. Load the user and check the account is still active.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let next = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let login_required = || AuthRejection::LoginRequired { next: next.clone() };

        let token = session_token(&parts.headers).ok_or_else(login_required)?;
        let session_id =
            verify_session_token(&token, &config.session_secret).ok_or_else(login_required)?;

        let session = repo
            .get_session(session_id)
            .await
            .map_err(|e| {
                tracing::error!("session lookup failed: {:?}", e);
                AuthRejection::Internal
            })?
            .filter(|session| !session.is_expired_at(Utc::now()))
            .ok_or_else(login_required)?;

        let user = repo
            .get_user(session.user_id)
            .await
            .map_err(|e| {
                tracing::error!("user lookup failed: {:?}", e);
                AuthRejection::Internal
            })?
            .filter(|user| user.is_active)
            .ok_or_else(login_required)?;

        Ok(AuthUser {
            id: user.id,
            username: user.username,
            is_staff: user.is_staff,
            session_id: session.id,
        })
    }
}

/// Lets handlers take `Option<AuthUser>` to serve anonymous and logged-in readers alike.
impl<S> OptionalFromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        match <AuthUser as FromRequestParts<S>>::from_request_parts(parts, state).await {
            Ok(user) => Ok(Some(user)),
            Err(AuthRejection::LoginRequired { .. }) => Ok(None),
            Err(AuthRejection::Internal) => Err(AuthRejection::Internal),
        }
    }
}
