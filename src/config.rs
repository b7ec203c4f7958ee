use config::{Config, ConfigError, File};
use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::{
    postgres::{PgConnectOptions, PgSslMode},
    ConnectOptions,
};
use std::time::Duration;

use crate::digest::recurrence::Recurrence;
use crate::digest::retry::RetryPolicy;
use crate::domain::subscriber_email::SubscriberEmail;

#[derive(Debug)]
pub enum Environment {
    Development,
    Production,
}

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub email_client: EmailClientSettings,
    pub listings_client: ListingsClientSettings,
    pub redis: RedisSettings,
    pub digest: DigestSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub api_key: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

#[derive(serde::Deserialize, Clone)]
pub struct ListingsClientSettings {
    pub base_url: String,
    pub api_key: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub page_size: u16,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    // secrecy protects secret information and prevents them to be exposed (eg: via logs)
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub name: String,
    pub require_ssl: bool,
}

#[derive(serde::Deserialize, Clone)]
pub struct RedisSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
}

/// Knobs of the recurring digest job. Everything that shapes the run lives here so tests
/// can drive the orchestrator with a tiny pool and zero backoff.
#[derive(serde::Deserialize, Clone, Debug)]
pub struct DigestSettings {
    pub recurrence: Recurrence,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub worker_pool_size: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub listing_retries: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub delivery_retries: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_backoff_milliseconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub subscriber_timeout_seconds: u64,
    pub send_no_matches_email: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_listings_per_digest: usize,
}

impl Settings {
    pub fn get_address(&self) -> String {
        format!(
            "{}:{}",
            self.application.get_host(),
            self.application.get_port()
        )
    }

    pub fn get_db_options(&self) -> PgConnectOptions {
        self.database.get_db_options()
    }

    pub fn get_email_client_sender(&self) -> Result<SubscriberEmail, String> {
        self.email_client.get_sender_email()
    }

    pub fn set_listings_client_base_url(&mut self, new_base_url: String) {
        self.listings_client.set_base_url(new_base_url)
    }

    pub fn set_app_port(&mut self, port: u16) {
        self.application.port = port;
    }

    pub fn get_redis_address(&self) -> String {
        self.redis.get_address()
    }
}

impl DatabaseSettings {
    /// Options for the Postgres server itself, without selecting a database. Used to
    /// create databases before connecting to them.
    pub fn get_server_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .password(self.password.expose_secret())
            .username(&self.username)
            .port(self.port)
            .ssl_mode(ssl_mode)
    }

    pub fn get_db_options(&self) -> PgConnectOptions {
        let mut db_options = self.get_server_options().database(&self.name);

        db_options.log_statements(tracing::log::LevelFilter::Trace);

        db_options
    }

    pub fn set_name(&mut self, new_db_name: String) {
        self.name = new_db_name
    }
}

impl ApplicationSettings {
    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn get_host(&self) -> String {
        self.host.clone()
    }
}

impl EmailClientSettings {
    pub fn get_sender_email(&self) -> Result<SubscriberEmail, String> {
        SubscriberEmail::parse(self.sender_email.clone())
    }

    pub fn get_base_url(&self) -> String {
        self.base_url.clone()
    }

    pub fn get_api_key(&self) -> Secret<String> {
        self.api_key.clone()
    }

    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }
}

impl ListingsClientSettings {
    pub fn get_base_url(&self) -> String {
        self.base_url.clone()
    }

    pub fn get_api_key(&self) -> Secret<String> {
        self.api_key.clone()
    }

    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }

    pub fn set_base_url(&mut self, new_base_url: String) {
        self.base_url = new_base_url
    }
}

impl RedisSettings {
    pub fn get_address(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

impl DigestSettings {
    pub fn listing_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.listing_retries, self.retry_backoff())
    }

    pub fn delivery_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.delivery_retries, self.retry_backoff())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_milliseconds)
    }

    pub fn subscriber_timeout(&self) -> Duration {
        Duration::from_secs(self.subscriber_timeout_seconds)
    }

    /// A pool of zero workers would never make progress.
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size.max(1)
    }
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            unknown_env => Err(format!(
                "{} is not supported environment. Use either 'development' or 'production'.",
                unknown_env
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let root_path = std::env::current_dir()
        .map_err(|err| ConfigError::Message(format!("Failed to read current directory: {err}")))?;
    let config_directory = root_path.join("config");
    // Uses development environment by default
    let enviroment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "development".into())
        .try_into()
        .map_err(ConfigError::Message)?;
    let config_base_filepath = config_directory.join("base");
    let config_env_filepath = config_directory.join(enviroment.as_str());

    // It merges the base configuration file with the one from the specific environment (development or production)
    let settings = Config::builder()
        .add_source(File::from(config_base_filepath).required(true))
        .add_source(File::from(config_env_filepath).required(true))
        // Merge settings from environment variables with a prefix of APP and "__" separator
        // E.g APP_DIGEST__WORKER_POOL_SIZE would set Settings.digest.worker_pool_size
        .add_source(
            config::Environment::with_prefix("app")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    tracing::info!("Application environment = {:?}", enviroment);

    // Try to convert the value from the configuration file into a Settings type
    settings.try_deserialize()
}
