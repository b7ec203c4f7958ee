use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use crate::domain::display_name::DisplayName;
use crate::domain::subscriber_email::SubscriberEmail;

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;

#[derive(Debug)]
pub struct NewUser {
    pub username: DisplayName,
    pub email: SubscriberEmail,
    pub password: Secret<String>,
}

#[derive(Deserialize)]
pub struct NewUserBody {
    pub username: String,
    pub email: String,
    pub password: Secret<String>,
}

impl TryFrom<NewUserBody> for NewUser {
    type Error = String;

    fn try_from(body: NewUserBody) -> Result<Self, Self::Error> {
        let username = DisplayName::parse(body.username)?;
        let email = SubscriberEmail::parse(body.email)?;
        let password_length = body.password.expose_secret().chars().count();

        if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&password_length) {
            return Err(format!(
                "Password must be between {} and {} characters long",
                MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH
            ));
        }

        Ok(NewUser {
            username,
            email,
            password: body.password,
        })
    }
}
