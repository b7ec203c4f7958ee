mod health_check;
mod login;
mod logout;
mod pets;
mod preferences;
mod signup;

pub use health_check::*;
pub use login::*;
pub use logout::*;
pub use pets::*;
pub use preferences::*;
pub use signup::*;
