use async_trait::async_trait;
use reqwest::Client;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::TwilioConfig;
use crate::models::user::mask_phone;

/// Outbound text message capability.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), anyhow::Error>;
}

/// Programmable Messaging API sender.
#[derive(Clone)]
pub struct TwilioSmsSender {
    client: Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioSmsSender {
    pub fn new(config: &TwilioConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        tracing::info!("SMS delivery via Twilio enabled");

        Ok(Self {
            client,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
        })
    }
}

#[async_trait]
impl SmsSender for TwilioSmsSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), anyhow::Error> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let form = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];

        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Request to Twilio failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!(%status, error = %error_body, to = %mask_phone(to), "Twilio rejected SMS");
            return Err(anyhow::anyhow!("Twilio returned {}", status));
        }

        tracing::info!(to = %mask_phone(to), "SMS sent");
        Ok(())
    }
}

/// Logs that a message would have been sent. The body is never logged since
/// it carries the code.
#[derive(Default, Clone)]
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, to: &str, _body: &str) -> Result<(), anyhow::Error> {
        tracing::warn!(to = %mask_phone(to), "SMS transport not configured, message dropped");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentSms {
    pub to: String,
    pub body: String,
}

/// Records messages for assertions; can be switched to fail.
#[derive(Default)]
pub struct MockSmsSender {
    pub sent: Mutex<Vec<SentSms>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl MockSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentSms> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Six-digit code from the most recent message to `to`.
    pub fn last_code_for(&self, to: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.to == to)
            .and_then(|m| extract_code(&m.body))
    }
}

fn extract_code(body: &str) -> Option<String> {
    body.split(|c: char| !c.is_ascii_digit())
        .find(|chunk| chunk.len() == 6)
        .map(str::to_string)
}

#[async_trait]
impl SmsSender for MockSmsSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), anyhow::Error> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock SMS transport failure"));
        }
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock SMS mutex poisoned: {}", e))?
            .push(SentSms {
                to: to.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}
