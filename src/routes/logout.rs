use actix_web::{web, HttpResponse};
use anyhow::Context;

use crate::authentication::{AuthError, AuthenticatedUser, SessionStore};

#[derive(serde::Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[tracing::instrument(name = "Logging a user out", skip(user, sessions), fields(user_id = %user.user_id))]
pub async fn handle_logout(
    user: AuthenticatedUser,
    sessions: web::Data<SessionStore>,
) -> Result<HttpResponse, AuthError> {
    sessions
        .revoke(&user.token)
        .await
        .context("Failed to revoke the session token.")?;

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}
