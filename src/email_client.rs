use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::time;

use crate::domain::message::Message;
use crate::domain::subscriber_email::SubscriberEmail;
use crate::utils::error_chain_fmt;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Sends one rendered message to one recipient. Implementations do not retry and do not
/// deduplicate; the caller owns the retry policy.
#[async_trait]
pub trait MailDispatcher: Send + Sync {
    async fn send(&self, recipient: &SubscriberEmail, message: &Message)
        -> Result<(), DeliveryError>;
}

#[derive(thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to deliver the email.")]
    DeliveryFailed(#[source] anyhow::Error),
}

impl std::fmt::Debug for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

pub struct EmailClient {
    http_client: Client,
    base_url: String,
    sender: SubscriberEmail,
    api_key: Secret<String>,
}

#[derive(serde::Serialize)]
pub struct SendEmailBody {
    personalizations: Vec<SendgridPersonalization>,
    from: SendgridEmail,
    subject: String,
    content: Vec<SendgridContent>,
}

#[derive(serde::Serialize)]
struct SendgridEmail {
    email: String,
}

#[derive(serde::Serialize)]
struct SendgridPersonalization {
    to: Vec<SendgridEmail>,
}

#[derive(serde::Serialize)]
struct SendgridContent {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: SubscriberEmail,
        api_key: Secret<String>,
        timeout: Option<time::Duration>,
    ) -> Result<EmailClient, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()?;

        Ok(EmailClient {
            http_client,
            base_url,
            sender,
            api_key,
        })
    }

    #[tracing::instrument(
        name = "Sending an email through the mail transport",
        skip(self, html_content, text_content),
        fields(recipient = %recipient, subject = %subject)
    )]
    pub async fn send_email(
        &self,
        recipient: &SubscriberEmail,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> Result<(), reqwest::Error> {
        let url = format!("{}/mail/send", self.base_url);
        let body = SendEmailBody {
            from: SendgridEmail {
                email: String::from(self.sender.as_ref()),
            },
            personalizations: vec![SendgridPersonalization {
                to: vec![SendgridEmail {
                    email: String::from(recipient.as_ref()),
                }],
            }],
            subject: String::from(subject),
            // plain text must come first, the transport rejects it otherwise
            content: vec![
                SendgridContent {
                    content_type: String::from("text/plain"),
                    value: String::from(text_content),
                },
                SendgridContent {
                    content_type: String::from("text/html"),
                    value: String::from(html_content),
                },
            ],
        };

        self.http_client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await?
            .error_for_status()?; // return an error when server response status code is 4xx or 5xx

        Ok(())
    }
}

#[async_trait]
impl MailDispatcher for EmailClient {
    async fn send(
        &self,
        recipient: &SubscriberEmail,
        message: &Message,
    ) -> Result<(), DeliveryError> {
        self.send_email(
            recipient,
            &message.subject,
            &message.html_body,
            &message.text_body,
        )
        .await
        .map_err(|err| DeliveryError::DeliveryFailed(err.into()))
    }
}
