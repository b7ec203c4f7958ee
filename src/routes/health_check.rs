use actix_web::HttpResponse;

/// Liveness probe. Answers as soon as the HTTP server is accepting connections,
/// it does not touch the database, Redis or the listings provider.
#[tracing::instrument(name = "Reporting liveness")]
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().finish()
}
