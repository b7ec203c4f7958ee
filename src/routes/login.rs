use actix_web::{web, HttpResponse};
use anyhow::Context;
use secrecy::Secret;
use serde::Deserialize;
use sqlx::PgPool;

use crate::authentication::{validate_credentials, AuthError, Credentials, SessionStore};
use crate::routes::SessionResponse;

#[derive(Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: Secret<String>,
}

#[tracing::instrument(
    name = "Logging a user in",
    skip(body, db_pool, sessions),
    fields(user_email = %body.email, user_id = tracing::field::Empty)
)]
pub async fn handle_login(
    body: web::Json<LoginBody>,
    db_pool: web::Data<PgPool>,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, AuthError> {
    let body = body.into_inner();
    let credentials = Credentials {
        email: body.email,
        password: body.password,
    };
    let user = validate_credentials(credentials, &db_pool)
        .await
        .map_err(|err| {
            tracing::warn!(error.cause_chain = ?err, "Login attempt failed.");
            err
        })?;

    tracing::Span::current().record("user_id", tracing::field::display(&user.id));

    let token = sessions
        .issue(user.id)
        .await
        .context("Failed to issue a session token.")?;

    Ok(HttpResponse::Ok().json(SessionResponse { user, token }))
}
