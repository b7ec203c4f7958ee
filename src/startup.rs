use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use std::net::TcpListener;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_actix_web::TracingLogger;

use crate::authentication::SessionStore;
use crate::config::{DatabaseSettings, Settings};
use crate::digest::{DigestOrchestrator, DigestScheduler};
use crate::email_client::EmailClient;
use crate::listings_client::ListingsClient;
use crate::preference_store::PgPreferenceStore;
use crate::routes::{
    handle_get_preferences, handle_list_pets, handle_login, handle_logout,
    handle_save_preferences, handle_signup, health_check,
};

pub struct Application {
    pub port: u16,
    pub server: Server,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let db_pool = get_connection_db_pool(&config.database);
        let listings_client = build_listings_client(&config)?;
        let redis_client = redis::Client::open(config.get_redis_address())
            .context("Invalid redis address.")?;

        let listener =
            TcpListener::bind(config.get_address()).context("Failed to bind the address.")?;
        let port = listener.local_addr()?.port();
        let server = run(
            listener,
            db_pool,
            listings_client,
            SessionStore::new(redis_client),
        )?;

        Ok(Self { port, server })
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stop(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn run(
    listener: TcpListener,
    db_pool: PgPool,
    listings_client: ListingsClient,
    sessions: SessionStore,
) -> Result<Server, std::io::Error> {
    let preference_store = web::Data::new(PgPreferenceStore::new(db_pool.clone()));
    let db_pool = web::Data::new(db_pool);
    let listings_client = web::Data::new(listings_client);
    let sessions = web::Data::new(sessions);

    let server = HttpServer::new(move || {
        // App is where your application logic lives: routing, middlewares, request handler, etc
        App::new()
            // 'wrap' method adds a middleware to the App. This specific middleware provide incoming
            // request logger
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/api")
                    .route("/signup", web::post().to(handle_signup))
                    .route("/login", web::post().to(handle_login))
                    .route("/logout", web::post().to(handle_logout))
                    .route("/preferences", web::get().to(handle_get_preferences))
                    .route("/preferences", web::post().to(handle_save_preferences))
                    .route("/pets", web::get().to(handle_list_pets)),
            )
            .app_data(db_pool.clone())
            .app_data(preference_store.clone())
            .app_data(listings_client.clone())
            .app_data(sessions.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// Wire the digest pipeline against the real adapters.
pub fn build_digest_scheduler(
    config: &Settings,
    cancellation: CancellationToken,
) -> Result<DigestScheduler, anyhow::Error> {
    let store = PgPreferenceStore::new(get_connection_db_pool(&config.database));
    let listings_client = build_listings_client(config)?;
    let email_client = build_email_client(config)?;
    let orchestrator = DigestOrchestrator::new(
        Arc::new(store),
        Arc::new(listings_client),
        Arc::new(email_client),
        config.digest.clone(),
    );

    Ok(DigestScheduler::new(
        Arc::new(orchestrator),
        config.digest.recurrence,
        cancellation,
    ))
}

pub fn build_email_client(config: &Settings) -> Result<EmailClient, anyhow::Error> {
    let sender_email = config
        .get_email_client_sender()
        .map_err(anyhow::Error::msg)
        .context("Sender email is not valid.")?;

    EmailClient::new(
        config.email_client.get_base_url(),
        sender_email,
        config.email_client.get_api_key(),
        Some(config.email_client.get_timeout()),
    )
    .context("Failed to build the email client.")
}

pub fn build_listings_client(config: &Settings) -> Result<ListingsClient, anyhow::Error> {
    ListingsClient::new(
        config.listings_client.get_base_url(),
        config.listings_client.get_api_key(),
        Some(config.listings_client.page_size),
        Some(config.listings_client.get_timeout()),
    )
    .context("Failed to build the listings client.")
}

pub fn get_connection_db_pool(config: &DatabaseSettings) -> Pool<Postgres> {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(config.get_db_options())
}
