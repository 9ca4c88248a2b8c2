//! PostgreSQL repository implementations

mod access_grant;
mod otp;
mod revoked_token;

pub use access_grant::AccessGrantRepo;
pub use otp::OtpRepo;
pub use revoked_token::RevokedTokenRepo;
