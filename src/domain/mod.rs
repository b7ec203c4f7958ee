pub mod display_name;
pub mod listing;
pub mod message;
pub mod new_user;
pub mod preferences;
pub mod subscriber;
pub mod subscriber_email;
