use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    EmailVerification,
    PasswordReset,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::EmailVerification => "email_verification",
            TokenKind::PasswordReset => "password_reset",
        }
    }

    pub fn lifetime(&self) -> Duration {
        match self {
            TokenKind::EmailVerification => Duration::hours(24),
            TokenKind::PasswordReset => Duration::hours(1),
        }
    }
}

/// Emailed single-use token. The link carries the raw value, the row its hash.
#[derive(Debug, Clone, FromRow)]
pub struct VerificationToken {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub token_kind: String,
    pub token_hash: String,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl VerificationToken {
    pub fn new(user_id: Uuid, kind: TokenKind, token_hash: String) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            user_id,
            token_kind: kind.as_str().to_string(),
            token_hash,
            expiry_utc: now + kind.lifetime(),
            consumed_utc: None,
            created_utc: now,
        }
    }

    pub fn is_kind(&self, kind: TokenKind) -> bool {
        self.token_kind == kind.as_str()
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.consumed_utc.is_none() && self.expiry_utc > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifetimes() {
        let invite = VerificationToken::new(Uuid::new_v4(), TokenKind::EmailVerification, "a".into());
        let reset = VerificationToken::new(Uuid::new_v4(), TokenKind::PasswordReset, "b".into());

        assert_eq!((invite.expiry_utc - invite.created_utc).num_hours(), 24);
        assert_eq!((reset.expiry_utc - reset.created_utc).num_hours(), 1);
        assert!(reset.is_kind(TokenKind::PasswordReset));
        assert!(!reset.is_kind(TokenKind::EmailVerification));
    }

    #[test]
    fn test_consumed_token_is_unusable() {
        let mut token = VerificationToken::new(Uuid::new_v4(), TokenKind::PasswordReset, "c".into());
        assert!(token.is_usable_at(Utc::now()));

        token.consumed_utc = Some(Utc::now());
        assert!(!token.is_usable_at(Utc::now()));
    }
}
