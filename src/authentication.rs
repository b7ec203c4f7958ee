use actix_web::dev::Payload;
use actix_web::http::StatusCode;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse, ResponseError};
use anyhow::{anyhow, Context};
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use rand::Rng;
use secrecy::{ExposeSecret, Secret};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

use crate::telemetry::spawn_blocking_with_tracing;
use crate::utils::{error_chain_fmt, ErrorBody};

const SESSION_TOKEN_LENGTH: usize = 32;
const SESSION_TTL_SECONDS: u64 = 60 * 60;
// Verified against when the email is unknown, so both paths cost the same time
const FALLBACK_PASSWORD_HASH: &str = "$argon2id$v=19$m=15000,t=2,p=1$gZiV/M1gPc22ElAH/Jh1Hw$CWOrkoo7oJBQ/iyh7uJ0LO2aLEfrHwTWllSAxT0zRno";

#[derive(Debug, Clone, serde::Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

pub struct Credentials {
    pub email: String,
    pub password: Secret<String>,
}

#[derive(thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials(#[source] anyhow::Error),
    #[error("Unauthorized")]
    MissingToken,
    #[error("Forbidden")]
    InvalidToken,
    #[error("Internal Server Error")]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials(_) | AuthError::MissingToken => StatusCode::UNAUTHORIZED,
            AuthError::InvalidToken => StatusCode::FORBIDDEN,
            AuthError::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::new(self))
    }
}

#[tracing::instrument(name = "Hashing a password", skip(password))]
pub async fn hash_password(password: Secret<String>) -> Result<Secret<String>, anyhow::Error> {
    spawn_blocking_with_tracing(move || compute_password_hash(password))
        .await
        .context("Failed to spawn blocking task.")?
}

fn compute_password_hash(password: Secret<String>) -> Result<Secret<String>, anyhow::Error> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let params = Params::new(15000, 2, 1, None).map_err(|err| anyhow!("{}", err))?;
    let password_hash = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|err| anyhow!("{}", err))?
        .to_string();

    Ok(Secret::new(password_hash))
}

#[tracing::instrument(name = "Validating credentials", skip(credentials, db_pool))]
pub async fn validate_credentials(
    credentials: Credentials,
    db_pool: &PgPool,
) -> Result<User, AuthError> {
    let mut user = None;
    let mut expected_password_hash = Secret::new(FALLBACK_PASSWORD_HASH.to_string());

    if let Some((stored_user, stored_password_hash)) =
        get_stored_credentials(&credentials.email, db_pool).await?
    {
        user = Some(stored_user);
        expected_password_hash = stored_password_hash;
    }

    spawn_blocking_with_tracing(move || {
        verify_password_hash(expected_password_hash, credentials.password)
    })
    .await
    .context("Failed to spawn blocking task.")??;

    user.ok_or_else(|| AuthError::InvalidCredentials(anyhow!("Unknown email.")))
}

async fn get_stored_credentials(
    email: &str,
    db_pool: &PgPool,
) -> Result<Option<(User, Secret<String>)>, anyhow::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(email.trim())
    .fetch_optional(db_pool)
    .await
    .context("Failed to retrieve stored credentials.")?;

    Ok(row.map(|row| {
        (
            User {
                id: row.get("id"),
                username: row.get("username"),
                email: row.get("email"),
            },
            Secret::new(row.get("password_hash")),
        )
    }))
}

fn verify_password_hash(
    expected_password_hash: Secret<String>,
    password_candidate: Secret<String>,
) -> Result<(), AuthError> {
    let expected_password_hash = PasswordHash::new(expected_password_hash.expose_secret())
        .map_err(|err| anyhow!("Failed to parse hash in PHC string format: {}", err))?;

    Argon2::default()
        .verify_password(
            password_candidate.expose_secret().as_bytes(),
            &expected_password_hash,
        )
        .map_err(|err| AuthError::InvalidCredentials(anyhow!("{}", err)))
}

/// Opaque bearer tokens kept in Redis, each one mapping to a user id for an hour.
#[derive(Clone)]
pub struct SessionStore {
    redis_client: redis::Client,
}

impl SessionStore {
    pub fn new(redis_client: redis::Client) -> Self {
        Self { redis_client }
    }

    fn key(token: &str) -> String {
        format!("session_token:{}:user_id", token)
    }

    #[tracing::instrument(name = "Issuing a session token", skip(self))]
    pub async fn issue(&self, user_id: Uuid) -> Result<String, redis::RedisError> {
        let token = generate_session_token();
        let mut redis_conn = self.redis_client.get_tokio_connection().await?;

        redis::cmd("SET")
            .arg(Self::key(&token))
            .arg(user_id.to_string())
            .arg("EX")
            .arg(SESSION_TTL_SECONDS)
            .query_async::<_, ()>(&mut redis_conn)
            .await?;

        Ok(token)
    }

    #[tracing::instrument(name = "Resolving a session token", skip(self, token))]
    pub async fn user_id(&self, token: &str) -> Result<Option<Uuid>, anyhow::Error> {
        let mut redis_conn = self.redis_client.get_tokio_connection().await?;
        let user_id: Option<String> = redis::cmd("GET")
            .arg(Self::key(token))
            .query_async(&mut redis_conn)
            .await?;

        Ok(user_id.and_then(|user_id| Uuid::parse_str(&user_id).ok()))
    }

    #[tracing::instrument(name = "Revoking a session token", skip(self, token))]
    pub async fn revoke(&self, token: &str) -> Result<(), redis::RedisError> {
        let mut redis_conn = self.redis_client.get_tokio_connection().await?;

        redis::cmd("DEL")
            .arg(Self::key(token))
            .query_async::<_, ()>(&mut redis_conn)
            .await
    }
}

fn generate_session_token() -> String {
    let mut rng = rand::thread_rng();

    std::iter::repeat_with(|| rng.sample(rand::distributions::Alphanumeric))
        .map(char::from)
        .take(SESSION_TOKEN_LENGTH)
        .collect()
}

/// Accepts both `Authorization: <token>` and `Authorization: Bearer <token>`.
fn extract_token(request: &HttpRequest) -> Result<String, AuthError> {
    let header = request
        .headers()
        .get("Authorization")
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidToken)?
        .trim();
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();

    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    Ok(token.to_string())
}

/// The caller behind a valid session token.
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub token: String,
}

impl FromRequest for AuthenticatedUser {
    type Error = AuthError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(request: &HttpRequest, _: &mut Payload) -> Self::Future {
        let token = extract_token(request);
        let sessions = request.app_data::<web::Data<SessionStore>>().cloned();

        Box::pin(async move {
            let token = token?;
            let sessions =
                sessions.ok_or_else(|| anyhow!("The session store is not registered."))?;
            let user_id = sessions
                .user_id(&token)
                .await?
                .ok_or(AuthError::InvalidToken)?;

            Ok(AuthenticatedUser { user_id, token })
        })
    }
}
