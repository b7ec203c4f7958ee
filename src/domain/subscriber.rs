use uuid::Uuid;

use crate::domain::display_name::DisplayName;
use crate::domain::preferences::Preferences;
use crate::domain::subscriber_email::SubscriberEmail;

/// A user with saved preferences, as seen by the digest pipeline.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Subscriber {
    pub id: Uuid,
    pub email: SubscriberEmail,
    pub name: DisplayName,
    pub preferences: Preferences,
}
