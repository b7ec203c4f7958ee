use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use anyhow::Context;
use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use sqlx::PgPool;
use uuid::Uuid;

use crate::authentication::{hash_password, SessionStore, User};
use crate::domain::new_user::{NewUser, NewUserBody};
use crate::utils::{error_chain_fmt, ErrorBody};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(serde::Serialize)]
pub struct SessionResponse {
    pub user: User,
    pub token: String,
}

#[tracing::instrument(
    name = "Signing up a new user",
    skip(body, db_pool, sessions),
    fields(
        username = %body.username,
        user_email = %body.email
    )
)]
pub async fn handle_signup(
    body: web::Json<NewUserBody>,
    db_pool: web::Data<PgPool>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, SignupError> {
    let new_user: NewUser = body.into_inner().try_into().map_err(SignupError::ValidationError)?;
    let password_hash = hash_password(new_user.password.clone()).await?;
    let user = insert_user(&new_user, password_hash, &db_pool).await?;
    let token = sessions
        .issue(user.id)
        .await
        .context("Failed to issue a session token.")?;

    Ok(HttpResponse::Created().json(SessionResponse { user, token }))
}

#[tracing::instrument(name = "Insert a new user into the database", skip(new_user, password_hash, db_pool))]
async fn insert_user(
    new_user: &NewUser,
    password_hash: Secret<String>,
    db_pool: &PgPool,
) -> Result<User, SignupError> {
    let user = User {
        id: Uuid::new_v4(),
        username: new_user.username.as_ref().to_string(),
        email: new_user.email.as_ref().to_string(),
    };

    sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(password_hash.expose_secret())
    .bind(Utc::now())
    .execute(db_pool)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            SignupError::DuplicateEmail
        } else {
            SignupError::UnexpectedError(
                anyhow::Error::new(err).context("Failed to insert the new user."),
            )
        }
    })?;

    Ok(user)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

#[derive(thiserror::Error)]
pub enum SignupError {
    #[error("{0}")]
    ValidationError(String),
    #[error("An account with this email already exists.")]
    DuplicateEmail,
    #[error("Internal Server Error")]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for SignupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for SignupError {
    fn status_code(&self) -> StatusCode {
        match self {
            SignupError::ValidationError(_) => StatusCode::BAD_REQUEST,
            SignupError::DuplicateEmail => StatusCode::CONFLICT,
            SignupError::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::new(self))
    }
}
