use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};

use crate::authentication::AuthenticatedUser;
use crate::domain::preferences::Preferences;
use crate::preference_store::{PgPreferenceStore, StoreError};
use crate::routes::SuccessResponse;
use crate::utils::{error_chain_fmt, ErrorBody};

#[tracing::instrument(name = "Reading the saved preferences", skip(user, store), fields(user_id = %user.user_id))]
pub async fn handle_get_preferences(
    user: AuthenticatedUser,
    store: web::Data<PgPreferenceStore>,
) -> Result<HttpResponse, PreferencesError> {
    let preferences = store
        .get_preferences(user.user_id)
        .await?
        .unwrap_or_default();

    Ok(HttpResponse::Ok().json(preferences))
}

#[tracing::instrument(
    name = "Saving preferences",
    skip(user, body, store),
    fields(user_id = %user.user_id, species = ?body.species, breed = ?body.breed)
)]
pub async fn handle_save_preferences(
    user: AuthenticatedUser,
    body: web::Json<Preferences>,
    store: web::Data<PgPreferenceStore>,
) -> Result<HttpResponse, PreferencesError> {
    let preferences = body.into_inner().normalized();

    store.save_preferences(user.user_id, &preferences).await?;

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}

#[derive(thiserror::Error)]
pub enum PreferencesError {
    #[error("Internal Server Error")]
    StoreError(#[from] StoreError),
}

impl std::fmt::Debug for PreferencesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for PreferencesError {
    fn status_code(&self) -> StatusCode {
        match self {
            PreferencesError::StoreError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::new(self))
    }
}
