use std::sync::Arc;
use uuid::Uuid;

use crate::models::{user::mask_phone, OtpPurpose, OtpTicket};
use crate::services::{sms::SmsSender, ServiceError};
use crate::store::tickets::{OtpTicketStore, TicketCheck, MAX_OTP_ATTEMPTS};
use crate::utils::crypto::{random_numeric_code, sha256_hex};

pub const OTP_DIGITS: u32 = 6;

/// Issues and checks one-time codes delivered by SMS.
#[derive(Clone)]
pub struct OtpChallenge {
    tickets: Arc<dyn OtpTicketStore>,
    sms: Arc<dyn SmsSender>,
}

impl OtpChallenge {
    pub fn new(tickets: Arc<dyn OtpTicketStore>, sms: Arc<dyn SmsSender>) -> Self {
        Self { tickets, sms }
    }

    /// Store a fresh ticket (replacing any earlier one for the same purpose)
    /// and text the code. The code itself is never returned.
    pub async fn issue(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        phone_number: &str,
    ) -> Result<Uuid, ServiceError> {
        let code = random_numeric_code(OTP_DIGITS);
        let ticket = OtpTicket::new(user_id, purpose, phone_number.to_string(), sha256_hex(&code));

        self.tickets.put_ticket(&ticket).await?;

        if let Err(e) = self.sms.send(phone_number, &purpose.message(&code)).await {
            tracing::error!(
                error = %e,
                user_id = %user_id,
                purpose = purpose.as_str(),
                to = %mask_phone(phone_number),
                "OTP delivery failed"
            );
            return Err(ServiceError::DeliveryFailed("sms".to_string()));
        }

        tracing::info!(
            user_id = %user_id,
            ticket_id = %ticket.ticket_id,
            purpose = purpose.as_str(),
            "OTP issued"
        );
        Ok(ticket.ticket_id)
    }

    pub async fn verify(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self.consume(user_id, purpose, code).await?.is_some())
    }

    /// Verify and hand back the consumed ticket, so callers can check what
    /// phone number it was sent to.
    pub async fn consume(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<Option<OtpTicket>, ServiceError> {
        let code = code.trim();
        if !is_well_formed(code) {
            return Ok(None);
        }

        let check = self
            .tickets
            .consume_ticket(user_id, purpose, &sha256_hex(code), MAX_OTP_ATTEMPTS)
            .await?;

        match check {
            TicketCheck::Verified(ticket) => {
                tracing::info!(user_id = %user_id, purpose = purpose.as_str(), "OTP verified");
                Ok(Some(ticket))
            }
            TicketCheck::Mismatch => {
                tracing::warn!(user_id = %user_id, purpose = purpose.as_str(), "OTP mismatch");
                Ok(None)
            }
            TicketCheck::Missing => Ok(None),
        }
    }

    /// Spend a one-shot proof derived from a verified code. `false` means it
    /// was already spent.
    pub async fn redeem_once(&self, token_id: &str, ttl_seconds: i64) -> Result<bool, ServiceError> {
        self.tickets.redeem_once(token_id, ttl_seconds).await
    }
}

fn is_well_formed(code: &str) -> bool {
    code.len() == OTP_DIGITS as usize && code.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sms::MockSmsSender;
    use crate::store::MemoryTicketStore;

    const PHONE: &str = "+15550001111";

    fn challenge() -> (OtpChallenge, Arc<MockSmsSender>) {
        let sms = Arc::new(MockSmsSender::new());
        let otp = OtpChallenge::new(Arc::new(MemoryTicketStore::new()), sms.clone());
        (otp, sms)
    }

    #[tokio::test]
    async fn test_code_verifies_once() {
        let (otp, sms) = challenge();
        let user_id = Uuid::new_v4();

        otp.issue(user_id, OtpPurpose::Login, PHONE).await.unwrap();
        let code = sms.last_code_for(PHONE).unwrap();

        assert!(otp.verify(user_id, OtpPurpose::Login, &code).await.unwrap());
        assert!(!otp.verify(user_id, OtpPurpose::Login, &code).await.unwrap());
    }

    #[tokio::test]
    async fn test_latest_ticket_wins() {
        let (otp, sms) = challenge();
        let user_id = Uuid::new_v4();

        otp.issue(user_id, OtpPurpose::Login, PHONE).await.unwrap();
        let first = sms.last_code_for(PHONE).unwrap();
        otp.issue(user_id, OtpPurpose::Login, PHONE).await.unwrap();
        let second = sms.last_code_for(PHONE).unwrap();

        if first != second {
            assert!(!otp.verify(user_id, OtpPurpose::Login, &first).await.unwrap());
        }
        assert!(otp.verify(user_id, OtpPurpose::Login, &second).await.unwrap());
    }

    #[tokio::test]
    async fn test_purposes_do_not_cross() {
        let (otp, sms) = challenge();
        let user_id = Uuid::new_v4();

        otp.issue(user_id, OtpPurpose::PhoneEnroll, PHONE).await.unwrap();
        let code = sms.last_code_for(PHONE).unwrap();

        assert!(!otp.verify(user_id, OtpPurpose::Login, &code).await.unwrap());
        assert!(otp.verify(user_id, OtpPurpose::PhoneEnroll, &code).await.unwrap());
    }

    #[tokio::test]
    async fn test_message_wording() {
        let (otp, sms) = challenge();
        otp.issue(Uuid::new_v4(), OtpPurpose::PhoneEnroll, PHONE).await.unwrap();

        let body = &sms.sent()[0].body;
        assert!(body.starts_with("Your Passport verification code is: "));
        assert!(body.ends_with(". Valid for 10 minutes."));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_reported() {
        let (otp, sms) = challenge();
        sms.set_failing(true);

        let result = otp.issue(Uuid::new_v4(), OtpPurpose::Login, PHONE).await;
        assert!(matches!(result, Err(ServiceError::DeliveryFailed(_))));
    }

    #[tokio::test]
    async fn test_malformed_code_rejected_without_touching_ticket() {
        let (otp, sms) = challenge();
        let user_id = Uuid::new_v4();
        otp.issue(user_id, OtpPurpose::Login, PHONE).await.unwrap();
        let code = sms.last_code_for(PHONE).unwrap();

        for _ in 0..10 {
            assert!(!otp.verify(user_id, OtpPurpose::Login, "12ab").await.unwrap());
        }
        assert!(otp.verify(user_id, OtpPurpose::Login, &code).await.unwrap());
    }
}
