use unicode_segmentation::UnicodeSegmentation;

const MAX_CHAR_LENGTH: usize = 256;
const FORBIDDEN_CHARS: [char; 9] = ['/', '{', '}', '"', '>', '<', '\\', '(', ')'];

/// The username chosen at signup. It ends up inside the digest greeting, hence the
/// character blacklist.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn parse(name: String) -> Result<DisplayName, String> {
        let is_empty_or_whitespace = name.trim().is_empty();
        let is_too_long = name.graphemes(true).count() > MAX_CHAR_LENGTH;
        let contains_forbidden_chars = name.chars().any(|char| FORBIDDEN_CHARS.contains(&char));

        if is_empty_or_whitespace || is_too_long || contains_forbidden_chars {
            return Err(format!("{} is not a valid display name", name));
        }

        Ok(Self(name.trim().to_string()))
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
