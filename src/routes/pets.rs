use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};

use crate::domain::listing::{Listing, ListingQuery};
use crate::listings_client::{ListingsClient, ListingsError};
use crate::utils::{error_chain_fmt, ErrorBody};

#[derive(serde::Serialize)]
pub struct PetsResponse {
    pub animals: Vec<Listing>,
}

/// Browse adoptable animals. Query parameters follow the provider: `type`, `breed`,
/// `location` and `keywords`.
#[tracing::instrument(name = "Browsing adoptable pets", skip(listings_client))]
pub async fn handle_list_pets(
    query: web::Query<ListingQuery>,
    listings_client: web::Data<ListingsClient>,
) -> Result<HttpResponse, PetsError> {
    let query = query.into_inner().normalized();
    let animals = listings_client.search(&query).await?;

    Ok(HttpResponse::Ok().json(PetsResponse { animals }))
}

#[derive(thiserror::Error)]
pub enum PetsError {
    #[error("The search filters were rejected.")]
    Rejected(#[source] ListingsError),
    #[error("The listings service is unavailable, try again later.")]
    Unavailable(#[source] ListingsError),
}

impl From<ListingsError> for PetsError {
    fn from(err: ListingsError) -> Self {
        if err.is_retryable() {
            PetsError::Unavailable(err)
        } else {
            PetsError::Rejected(err)
        }
    }
}

impl std::fmt::Debug for PetsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for PetsError {
    fn status_code(&self) -> StatusCode {
        match self {
            PetsError::Rejected(_) => StatusCode::BAD_REQUEST,
            PetsError::Unavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::new(self))
    }
}
