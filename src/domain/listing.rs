use serde::{Deserialize, Serialize};

use crate::domain::preferences::non_blank;
use crate::domain::subscriber::Subscriber;

/// One adoptable animal as returned by the listings provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub photo_url: Option<String>,
    pub species: String,
    pub breed: String,
    pub url: Option<String>,
}

/// Filter sent to the listings provider. All fields absent means "no narrowing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingQuery {
    #[serde(rename = "type")]
    pub species: Option<String>,
    pub breed: Option<String>,
    pub location: Option<String>,
    pub keywords: Option<String>,
}

impl ListingQuery {
    /// Blank values are dropped so they never reach the provider as empty parameters.
    pub fn normalized(self) -> ListingQuery {
        ListingQuery {
            species: non_blank(self.species),
            breed: non_blank(self.breed),
            location: non_blank(self.location),
            keywords: non_blank(self.keywords),
        }
    }
}

impl From<&Subscriber> for ListingQuery {
    fn from(subscriber: &Subscriber) -> Self {
        let preferences = &subscriber.preferences;

        ListingQuery {
            species: preferences.species.clone(),
            breed: preferences.breed.clone(),
            location: preferences.location(),
            keywords: preferences.free_text.clone(),
        }
        .normalized()
    }
}
