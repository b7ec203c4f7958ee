use voca_rs::{escape, strip};

use crate::domain::listing::Listing;
use crate::domain::message::Message;
use crate::domain::subscriber::Subscriber;

pub const NO_MATCHES_TEXT: &str = "There are no matches this week for your preferences.";
const NO_MATCHES_SUBJECT: &str = "No new adoptable pets this week";
const MAX_DESCRIPTION_CHARS: usize = 280;

/// Render the digest for one subscriber. Listings keep the order the provider returned.
pub fn compose(subscriber: &Subscriber, listings: &[Listing]) -> Message {
    let name = escape::escape_html(subscriber.name.as_ref());
    let criteria = describe_preferences(subscriber);

    if listings.is_empty() {
        return Message {
            subject: String::from(NO_MATCHES_SUBJECT),
            html_body: format!(
                r#"<div>
    <h1>Hi {name}!</h1>
    <p>{no_matches}</p>
    <p>We looked for {criteria}. We will keep looking and let you know next time.</p>
</div>"#,
                name = name,
                no_matches = NO_MATCHES_TEXT,
                criteria = escape::escape_html(&criteria),
            ),
            text_body: format!(
                "Hi {}!\n\n{}\nWe looked for {}. We will keep looking and let you know next time.\n",
                subscriber.name.as_ref(),
                NO_MATCHES_TEXT,
                criteria
            ),
        };
    }

    let subject = match listings.len() {
        1 => String::from("1 adoptable pet matches your preferences"),
        count => format!("{} adoptable pets match your preferences", count),
    };
    let html_items: String = listings.iter().map(html_item).collect();
    let text_items: String = listings.iter().map(text_item).collect();

    Message {
        subject,
        html_body: format!(
            r#"<div>
    <h1>Hi {name}!</h1>
    <p>These animals are looking for a home and match {criteria}:</p>
    <ul>
{items}    </ul>
</div>"#,
            name = name,
            criteria = escape::escape_html(&criteria),
            items = html_items,
        ),
        text_body: format!(
            "Hi {}!\n\nThese animals are looking for a home and match {}:\n\n{}",
            subscriber.name.as_ref(),
            criteria,
            text_items
        ),
    }
}

fn describe_preferences(subscriber: &Subscriber) -> String {
    let preferences = &subscriber.preferences;
    let mut parts = Vec::new();

    if let Some(breed) = &preferences.breed {
        parts.push(breed.clone());
    }
    if let Some(species) = &preferences.species {
        parts.push(species.clone());
    }
    if let Some(location) = preferences.location() {
        parts.push(format!("near {}", location));
    }

    if parts.is_empty() {
        String::from("your preferences")
    } else {
        format!("your preferences ({})", parts.join(", "))
    }
}

/// Provider descriptions may carry markup; keep plain text only, shortened.
fn clean_description(description: &str) -> String {
    let text = strip::strip_tags(description);
    let text = text.trim();

    if text.chars().count() <= MAX_DESCRIPTION_CHARS {
        return text.to_string();
    }

    let shortened: String = text.chars().take(MAX_DESCRIPTION_CHARS).collect();
    format!("{}…", shortened.trim_end())
}

fn html_item(listing: &Listing) -> String {
    let name = escape::escape_html(&listing.name);
    let photo = listing
        .photo_url
        .as_deref()
        .map(|url| {
            format!(
                r#"<img src="{}" alt="{}" width="300" />"#,
                escape::escape_html(url),
                name
            )
        })
        .unwrap_or_default();
    let link = listing
        .url
        .as_deref()
        .map(|url| {
            format!(
                r#"<a href="{}">Meet {}</a>"#,
                escape::escape_html(url),
                name
            )
        })
        .unwrap_or_default();

    format!(
        "        <li><h2>{name}</h2><p>{species} - {breed}</p>{photo}<p>{description}</p>{link}</li>\n",
        name = name,
        species = escape::escape_html(&listing.species),
        breed = escape::escape_html(&listing.breed),
        photo = photo,
        description = escape::escape_html(&clean_description(&listing.description)),
        link = link,
    )
}

fn text_item(listing: &Listing) -> String {
    let mut item = format!(
        "* {} ({} - {})\n  {}\n",
        listing.name,
        listing.species,
        listing.breed,
        clean_description(&listing.description)
    );

    if let Some(url) = &listing.url {
        item.push_str(&format!("  {}\n", url));
    }

    item
}
