#[cfg(feature = "web")]
use crate::app::AppState;
#[cfg(feature = "web")]
use crate::events;
#[cfg(feature = "web")]
use crate::session::SessionHandle;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
#[cfg(feature = "web")]
use axum::{
    Form,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, CookieJar};
#[cfg(feature = "web")]
use serde::{Deserialize, Serialize};

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

/// Identifier of an authenticated user
pub type UserId = String;

/// Checks a username/password pair
pub trait CredentialVerifier: Send + Sync {
    /// Returns the user's id when the credentials are valid
    fn verify(&self, username: &str, password: &str) -> Option<UserId>;
}

/// A single configured account
///
/// The password is only kept as an Argon2 hash.
pub struct SingleUserCredentials {
    user_id: UserId,
    username: String,
    password_hash: String,
}

impl SingleUserCredentials {
    /// Hash `password` and build the verifier
    ///
    /// # Errors
    /// * Returns an error if the password hashing fails
    pub fn new(user_id: &str, username: &str, password: &str) -> Result<Self, String> {
        Ok(Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            password_hash: hash_password(password)?,
        })
    }
}

impl CredentialVerifier for SingleUserCredentials {
    fn verify(&self, username: &str, password: &str) -> Option<UserId> {
        if username != self.username {
            return None;
        }
        match verify_password(password, &self.password_hash) {
            Ok(true) => Some(self.user_id.clone()),
            _ => None,
        }
    }
}

/// Hash a password using Argon2
///
/// Creates a salted Argon2id hash in PHC string format.
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
        Err(_) => Ok(false),
    }
}

// Web handler functions below (only compiled with "web" feature)

/// The authenticated session of the current request
///
/// Inserted into request extensions by [`require_auth`].
#[cfg(feature = "web")]
#[derive(Clone)]
pub struct CurrentSession {
    /// Session token from the cookie
    pub token: String,

    /// The session's state
    pub handle: SessionHandle,
}

/// Login form data
#[cfg(feature = "web")]
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

/// Messages passed to the login page through the query string
#[cfg(feature = "web")]
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoginQuery {
    pub error: Option<String>,
    pub message: Option<String>,
}

#[cfg(feature = "web")]
fn login_redirect(key: &str, text: &str) -> Redirect {
    Redirect::to(&format!("/login?{}={}", key, urlencoding::encode(text)))
}

/// Serve the login page
#[cfg(feature = "web")]
pub async fn serve_login_page(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Result<Html<String>, (StatusCode, String)> {
    state
        .templates
        .render("login", &query)
        .map(Html)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Handle login requests
///
/// Verifies the submitted credentials, starts a session and sets the
/// session cookie.
///
/// # Returns
/// * `Response` - Redirect to the dashboard, or back to the login page with an error
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(credentials): Form<LoginForm>,
) -> Response {
    if credentials.username.is_empty() || credentials.password.is_empty() {
        return login_redirect("error", "Username and password are required.").into_response();
    }

    match state
        .credentials
        .verify(&credentials.username, &credentials.password)
    {
        Some(user_id) => {
            let token = state.sessions.create(&user_id);
            let cookie = Cookie::build((SESSION_COOKIE, token))
                .path("/")
                .http_only(true);
            state.events.emit(events::USER_LOGGED_IN);
            log::info!("user {} logged in", user_id);
            (jar.add(cookie), Redirect::to("/dashboard")).into_response()
        }
        None => {
            log::info!("failed login for {}", credentials.username);
            login_redirect("error", "Invalid credentials.").into_response()
        }
    }
}

/// Handle user logout
///
/// Deletes everything the session stored on disk, drops the session and
/// clears the cookie.
#[cfg(feature = "web")]
pub async fn handle_logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(handle) = state.sessions.remove(cookie.value()) {
            state.files.clear_handle(&handle);
            state.events.emit(events::USER_LOGGED_OUT);
        }
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (
        jar,
        login_redirect("message", "You have been successfully logged out."),
    )
}

/// Authentication middleware
///
/// Lets the request through when the session cookie names a live session,
/// otherwise redirects to the login page.
#[cfg(feature = "web")]
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(handle) = state.sessions.get(cookie.value()) {
            request.extensions_mut().insert(CurrentSession {
                token: cookie.value().to_string(),
                handle,
            });
            return next.run(request).await;
        }
    }

    login_redirect("error", "You must be logged in to view this page.").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trip() {
        let hash = hash_password("password123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert_eq!(verify_password("password123", &hash), Ok(true));
        assert_eq!(verify_password("wrong", &hash), Ok(false));
        assert!(verify_password("password123", "not-a-hash").is_err());
    }

    #[test]
    fn single_user_verification() {
        let creds = SingleUserCredentials::new("1", "testuser", "password123").unwrap();
        assert_eq!(creds.verify("testuser", "password123"), Some("1".to_string()));
        assert_eq!(creds.verify("testuser", "nope"), None);
        assert_eq!(creds.verify("someone", "password123"), None);
    }
}
