use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::domain::display_name::DisplayName;
use crate::domain::preferences::Preferences;
use crate::domain::subscriber::Subscriber;
use crate::domain::subscriber_email::SubscriberEmail;
use crate::utils::error_chain_fmt;

/// Read side of the user store used by the digest job.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Every user with saved preferences, materialized in one read. Either the whole
    /// snapshot is returned or the call fails.
    async fn list_subscribers_with_preferences(&self) -> Result<SubscriberSnapshot, StoreError>;
}

/// The subscribers of one run, read at its start.
#[derive(Debug, Clone, Default)]
pub struct SubscriberSnapshot {
    pub subscribers: Vec<Subscriber>,
    /// Rows left out because their stored email or username no longer validates.
    pub skipped: usize,
}

impl From<Vec<Subscriber>> for SubscriberSnapshot {
    fn from(subscribers: Vec<Subscriber>) -> Self {
        Self {
            subscribers,
            skipped: 0,
        }
    }
}

#[derive(thiserror::Error)]
pub enum StoreError {
    #[error("The preference store is unavailable.")]
    StoreUnavailable(#[source] anyhow::Error),
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::StoreUnavailable(err.into())
    }
}

#[derive(Clone)]
pub struct PgPreferenceStore {
    db_pool: PgPool,
}

impl PgPreferenceStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    #[tracing::instrument(name = "Fetching the preferences of a user", skip(self))]
    pub async fn get_preferences(&self, user_id: Uuid) -> Result<Option<Preferences>, StoreError> {
        let preferences = sqlx::query(
            r#"
            SELECT species, breed, preferences, city, state
            FROM preferences
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .try_map(|row: PgRow| preferences_from_row(&row))
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(preferences)
    }

    #[tracing::instrument(name = "Saving the preferences of a user", skip(self, preferences))]
    pub async fn save_preferences(
        &self,
        user_id: Uuid,
        preferences: &Preferences,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO preferences (user_id, species, breed, preferences, city, state, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE
            SET species = EXCLUDED.species,
                breed = EXCLUDED.breed,
                preferences = EXCLUDED.preferences,
                city = EXCLUDED.city,
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&preferences.species)
        .bind(&preferences.breed)
        .bind(&preferences.free_text)
        .bind(&preferences.city)
        .bind(&preferences.state)
        .bind(Utc::now())
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    #[tracing::instrument(name = "Loading the subscriber snapshot", skip(self))]
    async fn list_subscribers_with_preferences(&self) -> Result<SubscriberSnapshot, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT u.id, u.email, u.username, p.species, p.breed, p.preferences, p.city, p.state
            FROM users u
            JOIN preferences p ON p.user_id = u.id
            ORDER BY u.id
            "#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        let mut snapshot = SubscriberSnapshot::default();
        for row in &rows {
            // A column that does not decode fails the whole snapshot
            match subscriber_from_row(row)? {
                Some(subscriber) => snapshot.subscribers.push(subscriber),
                None => snapshot.skipped += 1,
            }
        }

        Ok(snapshot)
    }
}

fn preferences_from_row(row: &PgRow) -> Result<Preferences, sqlx::Error> {
    Ok(Preferences {
        species: row.try_get("species")?,
        breed: row.try_get("breed")?,
        free_text: row.try_get("preferences")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
    })
}

/// Rows that no longer satisfy the signup validation are not eligible for a digest.
fn subscriber_from_row(row: &PgRow) -> Result<Option<Subscriber>, sqlx::Error> {
    let id: Uuid = row.try_get("id")?;
    let email = SubscriberEmail::parse(row.try_get("email")?);
    let name = DisplayName::parse(row.try_get("username")?);

    match (email, name) {
        (Ok(email), Ok(name)) => Ok(Some(Subscriber {
            id,
            email,
            name,
            preferences: preferences_from_row(row)?,
        })),
        (Err(err), _) | (_, Err(err)) => {
            tracing::warn!(subscriber_id = %id, "Skipping subscriber with invalid stored data: {}", err);
            Ok(None)
        }
    }
}
