//! Account registration, login and profile lookup.

use axum::{extract::State, Json};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::auth::{jwt, password, AuthError};
use crate::chat::Identity;
use crate::db::models::User;
use crate::db::DbPool;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Public view of a user; never includes the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub created_at: String,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AuthError::InvalidInput("Invalid email address".to_string())),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn find_by_email(conn: &rusqlite::Connection, email: &str) -> Result<Option<User>, AuthError> {
    Ok(conn
        .query_row(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = ?1",
            [email],
            row_to_user,
        )
        .optional()?)
}

fn lock(db: &DbPool) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, AuthError> {
    db.lock()
        .map_err(|e| AuthError::Internal(format!("DB lock: {}", e)))
}

/// Create an account. Fails with `EmailTaken` if the email is registered.
pub fn create_account(db: &DbPool, email: &str, password: &str) -> Result<Identity, AuthError> {
    let email = normalize_email(email)?;
    if password.is_empty() {
        return Err(AuthError::InvalidInput("Password cannot be empty".to_string()));
    }

    // Hash before taking the lock; Argon2 is deliberately slow
    let password_hash = password::hash_password(password)?;

    let conn = lock(db)?;
    if find_by_email(&conn, &email)?.is_some() {
        return Err(AuthError::EmailTaken);
    }

    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, email, password_hash, now],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            AuthError::EmailTaken
        }
        other => AuthError::from(other),
    })?;

    tracing::info!(user_id = %id, "Account created");
    Ok(Identity::new(id))
}

/// Check credentials and return the account's identity.
pub fn authenticate(db: &DbPool, email: &str, password: &str) -> Result<Identity, AuthError> {
    let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;

    let conn = lock(db)?;
    let user = find_by_email(&conn, &email)?;
    drop(conn);

    let Some(user) = user else {
        // Same Argon2 cost as a real check, so unknown emails are not faster
        if let Some(hash) = dummy_hash() {
            password::verify_password(password, hash);
        }
        return Err(AuthError::InvalidCredentials);
    };

    if !password::verify_password(password, &user.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(Identity::new(user.id))
}

/// Hash checked against when the email is unknown. Computed once.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();
    DUMMY_HASH
        .get_or_init(|| password::hash_password("parley-unknown-account").ok())
        .as_deref()
}

pub fn get_profile(db: &DbPool, user_id: &str) -> Result<UserProfile, AuthError> {
    let conn = lock(db)?;
    conn.query_row(
        "SELECT id, email, password_hash, created_at FROM users WHERE id = ?1",
        [user_id],
        row_to_user,
    )
    .optional()?
    .map(UserProfile::from)
    .ok_or(AuthError::UnknownUser)
}

pub fn list_profiles(db: &DbPool) -> Result<Vec<UserProfile>, AuthError> {
    let conn = lock(db)?;
    let mut stmt =
        conn.prepare("SELECT id, email, password_hash, created_at FROM users ORDER BY created_at")?;
    let users = stmt
        .query_map([], row_to_user)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users.into_iter().map(UserProfile::from).collect())
}

/// Run a blocking account operation on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Internal(format!("blocking task: {}", e)))?
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let db = state.db.clone();
    let identity = blocking(move || create_account(&db, &req.email, &req.password)).await?;

    let token = jwt::issue_token(&state.jwt_secret, identity.as_str(), state.token_ttl_secs)
        .map_err(|e| AuthError::Internal(e.to_string()))?;
    Ok(Json(TokenResponse { token }))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let db = state.db.clone();
    let identity = blocking(move || authenticate(&db, &req.email, &req.password)).await?;

    tracing::info!(user_id = %identity, "User logged in");

    let token = jwt::issue_token(&state.jwt_secret, identity.as_str(), state.token_ttl_secs)
        .map_err(|e| AuthError::Internal(e.to_string()))?;
    Ok(Json(TokenResponse { token }))
}

/// GET /api/auth/user. JWT auth required.
pub async fn get_user(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UserProfile>, AuthError> {
    let db = state.db.clone();
    let profile = blocking(move || get_profile(&db, &claims.sub)).await?;
    Ok(Json(profile))
}

/// GET /api/auth/users. All accounts, for picking a recipient. JWT auth required.
pub async fn list_users(
    State(state): State<AppState>,
    _claims: Claims,
) -> Result<Json<Vec<UserProfile>>, AuthError> {
    let db = state.db.clone();
    let profiles = blocking(move || list_profiles(&db)).await?;
    Ok(Json(profiles))
}
