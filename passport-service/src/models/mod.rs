pub mod authorization_code;
pub mod client;
pub mod grant;
pub mod otp_ticket;
pub mod role;
pub mod tenant;
pub mod trusted_device;
pub mod user;
pub mod verification_token;

pub use authorization_code::AuthorizationCode;
pub use client::Client;
pub use grant::Grant;
pub use otp_ticket::{OtpPurpose, OtpTicket};
pub use role::Role;
pub use tenant::Tenant;
pub use trusted_device::{DeviceInfo, TrustedDevice};
pub use user::{User, UserProfile};
pub use verification_token::{TokenKind, VerificationToken};
