pub mod authentication;
pub mod config;
pub mod digest;
pub mod domain;
pub mod email_client;
pub mod listings_client;
pub mod preference_store;
pub mod routes;
pub mod startup;
pub mod telemetry;
pub mod utils;
