use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

#[cfg(feature = "web")]
use crate::app::{AppState, error_response};
#[cfg(feature = "web")]
use crate::user::{Registration, User};
#[cfg(feature = "web")]
use axum::{
    Form, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, CookieJar};
#[cfg(feature = "web")]
use serde::Deserialize;
#[cfg(feature = "web")]
use std::sync::Arc;

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "session";

/// User session data
///
/// Represents an authenticated user session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Id of the authenticated account
    pub user_id: i64,

    /// Time when the session expires
    pub expires_at: SystemTime,
}

/// Global sessions storage
///
/// Stores all active user sessions in a thread-safe map.
lazy_static! {
    static ref SESSIONS: RwLock<HashMap<String, Session>> = RwLock::new(HashMap::new());
}

const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// Hash a password using Argon2
///
/// Creates a cryptographically secure hash of a password using Argon2id.
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `Result<String, String>` - The password hash or an error
///
/// # Errors
/// * Returns an error if the password hashing fails
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err("Password hashing failed".to_string()),
    }
}

/// Verify a password against a stored hash
///
/// # Arguments
/// * `password` - The plaintext password to verify
/// * `hash` - The stored password hash to check against
///
/// # Returns
/// * `Result<bool, String>` - True if the password matches, false if not, or an error
///
/// # Errors
/// * Returns an error if the hash is in an invalid format
pub fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(hash) => hash,
        Err(_) => return Err("Invalid password hash format".to_string()),
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false), // Password didn't match
    }
}

/// Create a new session for an authenticated account
///
/// # Returns
/// * `String` - A unique session ID
pub fn create_session(user_id: i64) -> String {
    let session_id = Uuid::new_v4().to_string();
    let expires_at = SystemTime::now() + Duration::from_secs(SESSION_DURATION);

    let mut sessions = SESSIONS.write().unwrap_or_else(|e| e.into_inner());
    sessions.retain(|_, s| s.expires_at > SystemTime::now());
    sessions.insert(
        session_id.clone(),
        Session {
            user_id,
            expires_at,
        },
    );

    session_id
}

/// Validate a session
///
/// # Returns
/// * `Option<i64>` - The account id for the session if valid, None otherwise
pub fn validate_session(session_id: &str) -> Option<i64> {
    let sessions = SESSIONS.read().unwrap_or_else(|e| e.into_inner());

    sessions
        .get(session_id)
        .filter(|session| session.expires_at > SystemTime::now())
        .map(|session| session.user_id)
}

/// Forget a session; later requests carrying its id are unauthenticated
pub fn end_session(session_id: &str) {
    let mut sessions = SESSIONS.write().unwrap_or_else(|e| e.into_inner());
    sessions.remove(session_id);
}

// Web handler functions below (only compiled with "web" feature)

/// Credential data for login
#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Handle user login requests
///
/// Validates credentials and, for approved accounts, sets the session cookie.
///
/// # Returns
/// * `Response` - The account as JSON, or 401/403 with a message
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<LoginForm>,
) -> Response {
    match state
        .tracker
        .login(&credentials.username, &credentials.password)
    {
        Ok(user) => {
            let session_id = create_session(user.id);
            let mut cookie = Cookie::new(SESSION_COOKIE, session_id);
            cookie.set_http_only(true);
            cookie.set_path("/");
            log::info!("{} logged in", user.username);
            (jar.add(cookie), Json(user)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Handle self-service registration
///
/// # Returns
/// * `Response` - 201 with the (unapproved) account, or an error message
#[cfg(feature = "web")]
pub async fn handle_signup(
    State(state): State<Arc<AppState>>,
    Form(registration): Form<Registration>,
) -> Response {
    match state.tracker.register(&registration) {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Handle user logout
///
/// Ends the session and clears the cookie.
#[cfg(feature = "web")]
pub async fn handle_logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        end_session(cookie.value());
    }
    let mut removal = Cookie::from(SESSION_COOKIE);
    removal.set_path("/");
    (jar.remove(removal), StatusCode::NO_CONTENT)
}

/// Authentication middleware
///
/// Resolves the session cookie to a current, approved account and stores it
/// in the request extensions for the handlers.
///
/// # Returns
/// * `Response` - Either passes the request through or answers 401
#[cfg(feature = "web")]
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let user_id = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| validate_session(cookie.value()));

    if let Some(user_id) = user_id {
        match state.tracker.database().get_user(user_id) {
            // Approval can be revoked (or the account deleted) mid-session
            Ok(Some(user)) if user.approved => {
                request.extensions_mut().insert::<User>(user);
                return next.run(request).await;
            }
            Ok(_) => {}
            Err(e) => return error_response(e),
        }
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "status": "error",
            "message": "authentication required",
        })),
    )
        .into_response()
}
