use crate::error::RepoError;
use crate::models::{
    Comment, CommentForm, NewProfile, NewUser, Post, PostForm, Session, User, UserProfileInfo,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository Trait
///
/// Contract for all persistence operations, so handlers never know whether they
/// talk to Postgres or to the in-memory store used by tests.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Posts ---
    /// Posts published at or before `now`, newest publication first.
    async fn list_published_posts(&self, now: DateTime<Utc>) -> RepoResult<Vec<Post>>;
    /// Posts without a publication date, oldest creation first.
    async fn list_draft_posts(&self) -> RepoResult<Vec<Post>>;
    async fn get_post(&self, id: i64) -> RepoResult<Option<Post>>;
    async fn create_post(&self, author_id: Uuid, form: PostForm) -> RepoResult<Post>;
    /// Replaces title and text; the author is left untouched.
    async fn update_post(&self, id: i64, form: PostForm) -> RepoResult<Option<Post>>;
    /// Deletes the post and its comments. Returns false when nothing was deleted.
    async fn delete_post(&self, id: i64) -> RepoResult<bool>;
    async fn publish_post(&self, id: i64, at: DateTime<Utc>) -> RepoResult<Option<Post>>;

    // --- Comments ---
    async fn add_comment(&self, post_id: i64, form: CommentForm) -> RepoResult<Comment>;
    async fn get_comment(&self, id: i64) -> RepoResult<Option<Comment>>;
    /// All comments of a post, oldest first.
    async fn get_comments(&self, post_id: i64) -> RepoResult<Vec<Comment>>;
    async fn approve_comment(&self, id: i64) -> RepoResult<Option<Comment>>;
    /// Deletes the comment and returns it, so callers still know its parent post.
    async fn delete_comment(&self, id: i64) -> RepoResult<Option<Comment>>;

    // --- Users ---
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>>;
    /// Inserts the account and its profile atomically. A taken username yields
    /// `RepoError::Constraint` and nothing is written.
    async fn register_user(
        &self,
        user: NewUser,
        profile: NewProfile,
    ) -> RepoResult<(User, UserProfileInfo)>;
    async fn get_profile(&self, user_id: Uuid) -> RepoResult<Option<UserProfileInfo>>;

    // --- Sessions ---
    async fn create_session(&self, session: Session) -> RepoResult<Session>;
    async fn get_session(&self, id: Uuid) -> RepoResult<Option<Session>>;
    async fn delete_session(&self, id: Uuid) -> RepoResult<bool>;
    /// Removes every session that expired before `now`; returns how many.
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> RepoResult<u64>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const POST_COLUMNS: &str = "id, author_id, title, text, created_date, published_date";
const COMMENT_COLUMNS: &str = "id, post_id, author, text, created_date, approved_comment";
const USER_COLUMNS: &str =
    "id, username, first_name, last_name, email, password_hash, is_active, is_staff, date_joined";
const PROFILE_COLUMNS: &str = "id, user_id, portfolio_site, profile_picture";
const SESSION_COLUMNS: &str = "id, user_id, created_at, expires_at";

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn list_published_posts(&self, now: DateTime<Utc>) -> RepoResult<Vec<Post>> {
        let query = format!(
            "SELECT {POST_COLUMNS} FROM posts \
             WHERE published_date IS NOT NULL AND published_date <= $1 \
             ORDER BY published_date DESC"
        );
        Ok(sqlx::query_as::<_, Post>(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_draft_posts(&self) -> RepoResult<Vec<Post>> {
        let query = format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE published_date IS NULL ORDER BY created_date ASC"
        );
        Ok(sqlx::query_as::<_, Post>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_post(&self, id: i64) -> RepoResult<Option<Post>> {
        let query = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        Ok(sqlx::query_as::<_, Post>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_post(&self, author_id: Uuid, form: PostForm) -> RepoResult<Post> {
        let query = format!(
            "INSERT INTO posts (author_id, title, text, created_date) \
             VALUES ($1, $2, $3, NOW()) RETURNING {POST_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Post>(&query)
            .bind(author_id)
            .bind(form.title)
            .bind(form.text)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_post(&self, id: i64, form: PostForm) -> RepoResult<Option<Post>> {
        let query = format!(
            "UPDATE posts SET title = $2, text = $3 WHERE id = $1 RETURNING {POST_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Post>(&query)
            .bind(id)
            .bind(form.title)
            .bind(form.text)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Comments go with the post through `ON DELETE CASCADE`.
    async fn delete_post(&self, id: i64) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn publish_post(&self, id: i64, at: DateTime<Utc>) -> RepoResult<Option<Post>> {
        let query =
            format!("UPDATE posts SET published_date = $2 WHERE id = $1 RETURNING {POST_COLUMNS}");
        Ok(sqlx::query_as::<_, Post>(&query)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn add_comment(&self, post_id: i64, form: CommentForm) -> RepoResult<Comment> {
        let query = format!(
            "INSERT INTO comments (post_id, author, text, created_date, approved_comment) \
             VALUES ($1, $2, $3, NOW(), false) RETURNING {COMMENT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Comment>(&query)
            .bind(post_id)
            .bind(form.author)
            .bind(form.text)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn get_comment(&self, id: i64) -> RepoResult<Option<Comment>> {
        let query = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1");
        Ok(sqlx::query_as::<_, Comment>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_comments(&self, post_id: i64) -> RepoResult<Vec<Comment>> {
        let query = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = $1 ORDER BY created_date ASC, id ASC"
        );
        Ok(sqlx::query_as::<_, Comment>(&query)
            .bind(post_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn approve_comment(&self, id: i64) -> RepoResult<Option<Comment>> {
        let query = format!(
            "UPDATE comments SET approved_comment = true WHERE id = $1 RETURNING {COMMENT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Comment>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_comment(&self, id: i64) -> RepoResult<Option<Comment>> {
        let query = format!("DELETE FROM comments WHERE id = $1 RETURNING {COMMENT_COLUMNS}");
        Ok(sqlx::query_as::<_, Comment>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Both inserts share one transaction; dropping `tx` on any error rolls back.
    async fn register_user(
        &self,
        user: NewUser,
        profile: NewProfile,
    ) -> RepoResult<(User, UserProfileInfo)> {
        let mut tx = self.pool.begin().await?;

        let user_query = format!(
            "INSERT INTO users (id, username, first_name, last_name, email, password_hash, \
             is_active, is_staff, date_joined) \
             VALUES ($1, $2, $3, $4, $5, $6, true, false, NOW()) RETURNING {USER_COLUMNS}"
        );
        let created_user = sqlx::query_as::<_, User>(&user_query)
            .bind(Uuid::new_v4())
            .bind(user.username)
            .bind(user.first_name)
            .bind(user.last_name)
            .bind(user.email)
            .bind(user.password_hash)
            .fetch_one(&mut *tx)
            .await?;

        let profile_query = format!(
            "INSERT INTO user_profiles (user_id, portfolio_site, profile_picture) \
             VALUES ($1, $2, $3) RETURNING {PROFILE_COLUMNS}"
        );
        let created_profile = sqlx::query_as::<_, UserProfileInfo>(&profile_query)
            .bind(created_user.id)
            .bind(profile.portfolio_site)
            .bind(profile.profile_picture)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((created_user, created_profile))
    }

    async fn get_profile(&self, user_id: Uuid) -> RepoResult<Option<UserProfileInfo>> {
        let query = format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = $1");
        Ok(sqlx::query_as::<_, UserProfileInfo>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_session(&self, session: Session) -> RepoResult<Session> {
        let query = format!(
            "INSERT INTO sessions (id, user_id, created_at, expires_at) \
             VALUES ($1, $2, $3, $4) RETURNING {SESSION_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Session>(&query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.created_at)
            .bind(session.expires_at)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn get_session(&self, id: Uuid) -> RepoResult<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        Ok(sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_session(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// --- In-Memory Implementation ---

#[derive(Default)]
struct MemoryTables {
    posts: HashMap<i64, Post>,
    comments: HashMap<i64, Comment>,
    users: HashMap<Uuid, User>,
    profiles: HashMap<Uuid, UserProfileInfo>,
    sessions: HashMap<Uuid, Session>,
    next_post_id: i64,
    next_comment_id: i64,
    next_profile_id: i64,
}

/// InMemoryRepository
///
/// A process-local `Repository` with the same ordering and integrity rules as the
/// Postgres schema. Used by the test suite and for running without a database.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<MemoryTables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a post exactly as given, for seeding fixtures with chosen timestamps.
    pub async fn insert_post(&self, mut post: Post) -> Post {
        let mut tables = self.tables.write().await;
        if post.id == 0 {
            tables.next_post_id += 1;
            post.id = tables.next_post_id;
        } else {
            tables.next_post_id = tables.next_post_id.max(post.id);
        }
        tables.posts.insert(post.id, post.clone());
        post
    }

    /// Stores a user as given; for fixtures such as inactive or staff accounts.
    pub async fn insert_user(&self, user: User) -> User {
        self.tables
            .write()
            .await
            .users
            .insert(user.id, user.clone());
        user
    }

    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }

    pub async fn profile_count(&self) -> usize {
        self.tables.read().await.profiles.len()
    }

    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_published_posts(&self, now: DateTime<Utc>) -> RepoResult<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|p| p.is_published_at(now))
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.published_date.cmp(&a.published_date).then(b.id.cmp(&a.id)));
        Ok(posts)
    }

    async fn list_draft_posts(&self) -> RepoResult<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|p| p.is_draft())
            .cloned()
            .collect();
        posts.sort_by(|a, b| a.created_date.cmp(&b.created_date).then(a.id.cmp(&b.id)));
        Ok(posts)
    }

    async fn get_post(&self, id: i64) -> RepoResult<Option<Post>> {
        Ok(self.tables.read().await.posts.get(&id).cloned())
    }

    async fn create_post(&self, author_id: Uuid, form: PostForm) -> RepoResult<Post> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&author_id) {
            return Err(RepoError::Constraint(format!(
                "post references missing author {author_id}"
            )));
        }
        tables.next_post_id += 1;
        let post = Post {
            id: tables.next_post_id,
            author_id,
            title: form.title,
            text: form.text,
            created_date: Utc::now(),
            published_date: None,
        };
        tables.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn update_post(&self, id: i64, form: PostForm) -> RepoResult<Option<Post>> {
        let mut tables = self.tables.write().await;
        Ok(tables.posts.get_mut(&id).map(|post| {
            post.title = form.title;
            post.text = form.text;
            post.clone()
        }))
    }

    async fn delete_post(&self, id: i64) -> RepoResult<bool> {
        let mut tables = self.tables.write().await;
        let removed = tables.posts.remove(&id).is_some();
        if removed {
            tables.comments.retain(|_, c| c.post_id != id);
        }
        Ok(removed)
    }

    async fn publish_post(&self, id: i64, at: DateTime<Utc>) -> RepoResult<Option<Post>> {
        let mut tables = self.tables.write().await;
        Ok(tables.posts.get_mut(&id).map(|post| {
            post.published_date = Some(at);
            post.clone()
        }))
    }

    async fn add_comment(&self, post_id: i64, form: CommentForm) -> RepoResult<Comment> {
        let mut tables = self.tables.write().await;
        if !tables.posts.contains_key(&post_id) {
            return Err(RepoError::Constraint(format!(
                "comment references missing post {post_id}"
            )));
        }
        tables.next_comment_id += 1;
        let comment = Comment {
            id: tables.next_comment_id,
            post_id,
            author: form.author,
            text: form.text,
            created_date: Utc::now(),
            approved_comment: false,
        };
        tables.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn get_comment(&self, id: i64) -> RepoResult<Option<Comment>> {
        Ok(self.tables.read().await.comments.get(&id).cloned())
    }

    async fn get_comments(&self, post_id: i64) -> RepoResult<Vec<Comment>> {
        let tables = self.tables.read().await;
        let mut comments: Vec<Comment> = tables
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_date.cmp(&b.created_date).then(a.id.cmp(&b.id)));
        Ok(comments)
    }

    async fn approve_comment(&self, id: i64) -> RepoResult<Option<Comment>> {
        let mut tables = self.tables.write().await;
        Ok(tables.comments.get_mut(&id).map(|comment| {
            comment.approved_comment = true;
            comment.clone()
        }))
    }

    async fn delete_comment(&self, id: i64) -> RepoResult<Option<Comment>> {
        Ok(self.tables.write().await.comments.remove(&id))
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn register_user(
        &self,
        user: NewUser,
        profile: NewProfile,
    ) -> RepoResult<(User, UserProfileInfo)> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(RepoError::Constraint(format!(
                "username {} already exists",
                user.username
            )));
        }

        let created_user = User {
            id: Uuid::new_v4(),
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            password_hash: user.password_hash,
            is_active: true,
            is_staff: false,
            date_joined: Utc::now(),
        };
        tables.next_profile_id += 1;
        let created_profile = UserProfileInfo {
            id: tables.next_profile_id,
            user_id: created_user.id,
            portfolio_site: profile.portfolio_site,
            profile_picture: profile.profile_picture,
        };

        tables.users.insert(created_user.id, created_user.clone());
        tables
            .profiles
            .insert(created_user.id, created_profile.clone());
        Ok((created_user, created_profile))
    }

    async fn get_profile(&self, user_id: Uuid) -> RepoResult<Option<UserProfileInfo>> {
        Ok(self.tables.read().await.profiles.get(&user_id).cloned())
    }

    async fn create_session(&self, session: Session) -> RepoResult<Session> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&session.user_id) {
            return Err(RepoError::Constraint(format!(
                "session references missing user {}",
                session.user_id
            )));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> RepoResult<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn delete_session(&self, id: Uuid) -> RepoResult<bool> {
        Ok(self.tables.write().await.sessions.remove(&id).is_some())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> RepoResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - tables.sessions.len()) as u64)
    }
}
