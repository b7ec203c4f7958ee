use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time;

use crate::domain::listing::{Listing, ListingQuery};
use crate::utils::error_chain_fmt;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);
const DEFAULT_PAGE_SIZE: u16 = 20;
const UNKNOWN_BREED: &str = "Unknown breed";

/// Source of adoptable animals. An empty vector is a successful "nothing matched" answer,
/// never a failure.
#[async_trait]
pub trait ListingsProvider: Send + Sync {
    async fn find_matches(&self, query: &ListingQuery) -> Result<Vec<Listing>, ListingsError>;
}

#[derive(thiserror::Error)]
pub enum ListingsError {
    /// Network failures, timeouts and 5xx/408/429 answers. Worth another attempt.
    #[error("The listings provider is unavailable.")]
    ProviderUnavailable(#[source] anyhow::Error),
    /// Any other non-2xx answer. Sending the same query again cannot succeed.
    #[error("The listings provider rejected the query.")]
    ProviderRejected(#[source] anyhow::Error),
}

impl ListingsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ListingsError::ProviderUnavailable(_))
    }
}

impl std::fmt::Debug for ListingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

pub struct ListingsClient {
    http_client: Client,
    base_url: String,
    api_key: Secret<String>,
    page_size: u16,
}

#[derive(Deserialize)]
struct AnimalsPage {
    #[serde(default)]
    animals: Vec<Animal>,
}

#[derive(Deserialize)]
struct Animal {
    id: u64,
    name: String,
    description: Option<String>,
    species: String,
    #[serde(default)]
    breeds: Breeds,
    primary_photo_cropped: Option<Photo>,
    #[serde(default)]
    photos: Vec<Photo>,
    url: Option<String>,
}

#[derive(Deserialize, Default)]
struct Breeds {
    primary: Option<String>,
    secondary: Option<String>,
    #[serde(default)]
    mixed: bool,
}

#[derive(Deserialize)]
struct Photo {
    medium: Option<String>,
    full: Option<String>,
}

impl Photo {
    fn url(self) -> Option<String> {
        self.medium.or(self.full)
    }
}

impl Breeds {
    fn describe(self) -> String {
        match (self.primary, self.secondary, self.mixed) {
            (Some(primary), Some(secondary), _) => format!("{} / {} mix", primary, secondary),
            (Some(primary), None, true) => format!("{} mix", primary),
            (Some(primary), None, false) => primary,
            (None, _, _) => String::from(UNKNOWN_BREED),
        }
    }
}

impl From<Animal> for Listing {
    fn from(animal: Animal) -> Self {
        let photo_url = animal
            .primary_photo_cropped
            .and_then(Photo::url)
            .or_else(|| animal.photos.into_iter().find_map(Photo::url));

        Listing {
            id: animal.id,
            name: animal.name,
            description: animal.description.unwrap_or_default(),
            photo_url,
            species: animal.species,
            breed: animal.breeds.describe(),
            url: animal.url,
        }
    }
}

impl ListingsClient {
    pub fn new(
        base_url: String,
        api_key: Secret<String>,
        page_size: Option<u16>,
        timeout: Option<time::Duration>,
    ) -> Result<ListingsClient, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()?;

        Ok(ListingsClient {
            http_client,
            base_url,
            api_key,
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        })
    }

    fn query_params(&self, query: &ListingQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![("limit", self.page_size.to_string())];
        let filters = [
            ("type", &query.species),
            ("breed", &query.breed),
            ("location", &query.location),
            ("keywords", &query.keywords),
        ];

        for (name, value) in filters {
            if let Some(value) = value {
                params.push((name, value.clone()));
            }
        }

        params
    }

    #[tracing::instrument(name = "Querying the listings provider", skip(self))]
    pub async fn search(&self, query: &ListingQuery) -> Result<Vec<Listing>, ListingsError> {
        let url = format!("{}/v2/animals", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(self.api_key.expose_secret())
            .query(&self.query_params(query))
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = anyhow!("Listings provider answered {}: {}", status, body);

            return Err(if is_retryable_status(status) {
                ListingsError::ProviderUnavailable(err)
            } else {
                ListingsError::ProviderRejected(err)
            });
        }

        let page: AnimalsPage = response
            .json()
            .await
            .context("Failed to decode the listings provider response.")
            .map_err(ListingsError::ProviderUnavailable)?;

        Ok(page.animals.into_iter().map(Listing::from).collect())
    }
}

#[async_trait]
impl ListingsProvider for ListingsClient {
    async fn find_matches(&self, query: &ListingQuery) -> Result<Vec<Listing>, ListingsError> {
        self.search(query).await
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn classify_transport_error(err: reqwest::Error) -> ListingsError {
    // A request that cannot even be built (bad base url) fails the same way every time
    if err.is_builder() {
        ListingsError::ProviderRejected(err.into())
    } else {
        ListingsError::ProviderUnavailable(err.into())
    }
}
