/// A rendered email, ready to be handed to the mail transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}
