use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use service_core::error::AppError;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::config::SmtpConfig;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_invitation_email(
        &self,
        to_email: &str,
        user_id: Uuid,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError>;

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        user_id: Uuid,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError>;
}

pub fn invitation_link(base_url: &str, user_id: Uuid, token: &str) -> String {
    format!(
        "{}/verify-email?userId={}&token={}",
        base_url.trim_end_matches('/'),
        user_id,
        urlencoding::encode(token)
    )
}

pub fn password_reset_link(base_url: &str, user_id: Uuid, token: &str) -> String {
    format!(
        "{}/reset-password?userId={}&token={}",
        base_url.trim_end_matches('/'),
        user_id,
        urlencoding::encode(token)
    )
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let mailer = match (&config.user, &config.password) {
            (Some(user), Some(password)) => SmtpTransport::starttls_relay(&config.host)
                .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
                .credentials(Credentials::new(user.clone(), password.clone()))
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build(),
            // Unauthenticated local relay (mailhog and friends)
            _ => SmtpTransport::builder_dangerous(&config.host)
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build(),
        };

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: &str,
        html_body: &str,
    ) -> Result<(), AppError> {
        let email = Message::builder()
            .from(self.from_email.parse().map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?)
            .to(to_email.parse().map_err(|e: lettre::address::AddressError| AppError::BadRequest(e.into()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| AppError::InternalError(e.into()))?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, subject = %subject, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_invitation_email(
        &self,
        to_email: &str,
        user_id: Uuid,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError> {
        let link = invitation_link(base_url, user_id, token);

        let html_body = format!(
            r###"<html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>You have been invited to Passport</h2>
                    <p>Confirm your email address and choose a password to activate your account:</p>
                    <p><a href="{}">Activate account</a></p>
                    <p style="color: #666; font-size: 12px;">This link expires in 24 hours.</p>
                </body>
            </html>"###,
            link
        );

        let plain_body = format!(
            "You have been invited to Passport.\n\nConfirm your email address and choose a password:\n\n{}\n\nThis link expires in 24 hours.",
            link
        );

        self.send_email(to_email, "Activate your account", &plain_body, &html_body)
            .await
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        user_id: Uuid,
        token: &str,
        base_url: &str,
    ) -> Result<(), AppError> {
        let link = password_reset_link(base_url, user_id, token);

        let html_body = format!(
            r###"<html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>Password Reset Request</h2>
                    <p>We received a request to reset your password. Click the link below to set a new password:</p>
                    <p><a href="{}">Reset Password</a></p>
                    <p style="color: #666; font-size: 12px;">
                        This link will expire in 1 hour. If you didn't request this, please ignore this email.
                    </p>
                </body>
            </html>"###,
            link
        );

        let plain_body = format!(
            "Password Reset Request\n\nVisit the following link to set a new password:\n\n{}\n\nThis link will expire in 1 hour. If you didn't request this, please ignore this email.",
            link
        );

        self.send_email(to_email, "Reset Your Password", &plain_body, &html_body)
            .await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SentEmailKind {
    Invitation,
    PasswordReset,
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub kind: SentEmailKind,
    pub to: String,
    pub user_id: Uuid,
    pub token: String,
}

/// Records outgoing mail instead of sending it.
#[derive(Default)]
pub struct MockEmailService {
    pub sent: Mutex<Vec<SentEmail>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_token(&self, kind: SentEmailKind, to: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.kind == kind && m.to == to)
            .map(|m| m.token)
    }

    fn record(&self, email: SentEmail) -> Result<(), AppError> {
        self.sent
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Mock email mutex poisoned: {}", e)))?
            .push(email);
        Ok(())
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_invitation_email(
        &self,
        to_email: &str,
        user_id: Uuid,
        token: &str,
        _base_url: &str,
    ) -> Result<(), AppError> {
        self.record(SentEmail {
            kind: SentEmailKind::Invitation,
            to: to_email.to_string(),
            user_id,
            token: token.to_string(),
        })
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        user_id: Uuid,
        token: &str,
        _base_url: &str,
    ) -> Result<(), AppError> {
        self.record(SentEmail {
            kind: SentEmailKind::PasswordReset,
            to: to_email.to_string(),
            user_id,
            token: token.to_string(),
        })
    }
}
