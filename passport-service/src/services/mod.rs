pub mod accounts;
pub mod admin;
pub mod credentials;
pub mod email;
pub mod error;
pub mod jwt;
pub mod login;
pub mod otp;
pub mod policy;
pub mod session_revocation;
pub mod sms;
pub mod tenant_directory;
pub mod token_authority;
pub mod trusted_devices;

pub use accounts::AccountService;
pub use admin::AdminService;
pub use credentials::CredentialStore;
pub use email::{EmailProvider, EmailService, MockEmailService};
pub use error::ServiceError;
pub use jwt::JwtService;
pub use login::{LoginService, SecondFactor};
pub use otp::OtpChallenge;
pub use policy::{Action, Principal};
pub use session_revocation::{ForceLogoutReport, SessionRevocationService};
pub use sms::{LogSmsSender, MockSmsSender, SmsSender, TwilioSmsSender};
pub use tenant_directory::TenantDirectory;
pub use token_authority::TokenAuthority;
pub use trusted_devices::TrustedDeviceRegistry;
