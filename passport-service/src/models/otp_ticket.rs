//! One-time-password tickets. Short lived, never stored as database rows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OtpPurpose {
    #[serde(rename = "phone-enroll")]
    PhoneEnroll,
    #[serde(rename = "login")]
    Login,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::PhoneEnroll => "phone-enroll",
            OtpPurpose::Login => "login",
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            OtpPurpose::PhoneEnroll => Duration::minutes(10),
            OtpPurpose::Login => Duration::minutes(5),
        }
    }

    pub fn message(&self, code: &str) -> String {
        match self {
            OtpPurpose::PhoneEnroll => format!(
                "Your Passport verification code is: {}. Valid for 10 minutes.",
                code
            ),
            OtpPurpose::Login => format!(
                "Your Passport login code is: {}. Valid for 5 minutes.",
                code
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpTicket {
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub purpose: OtpPurpose,
    pub phone_number: String,
    pub code_hash: String,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub attempts: u32,
}

impl OtpTicket {
    pub fn new(user_id: Uuid, purpose: OtpPurpose, phone_number: String, code_hash: String) -> Self {
        let now = Utc::now();
        Self {
            ticket_id: Uuid::new_v4(),
            user_id,
            purpose,
            phone_number,
            code_hash,
            issued_utc: now,
            expiry_utc: now + purpose.ttl(),
            attempts: 0,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    pub fn ttl_seconds(&self) -> i64 {
        (self.expiry_utc - self.issued_utc).num_seconds()
    }
}
