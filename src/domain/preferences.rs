use serde::{Deserialize, Serialize};

/// Search preferences saved by a user. Every field is optional: a user may only care
/// about the species, or only about the area they live in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub species: Option<String>,
    pub breed: Option<String>,
    /// Free text typed by the user, stored in the `preferences` column.
    #[serde(rename = "preferences")]
    pub free_text: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

impl Preferences {
    /// Trim every field and turn blank strings into `None`, so the store never keeps
    /// a filter that would narrow the search to nothing.
    pub fn normalized(self) -> Preferences {
        Preferences {
            species: non_blank(self.species),
            breed: non_blank(self.breed),
            free_text: non_blank(self.free_text),
            city: non_blank(self.city),
            state: non_blank(self.state),
        }
    }

    pub fn location(&self) -> Option<String> {
        match (&self.city, &self.state) {
            (Some(city), Some(state)) => Some(format!("{}, {}", city, state)),
            (Some(city), None) => Some(city.clone()),
            (None, Some(state)) => Some(state.clone()),
            (None, None) => None,
        }
    }
}

/// Trimmed value, or `None` when nothing is left.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
