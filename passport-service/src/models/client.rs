use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

/// Relying-party application allowed to run the authorization-code flow.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Client {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub created_utc: DateTime<Utc>,
}

impl Client {
    pub fn new(client_id: String, client_name: String, redirect_uris: Vec<String>) -> Self {
        Self {
            client_id,
            client_name,
            redirect_uris,
            created_utc: Utc::now(),
        }
    }

    /// Redirect URIs must match a registered value exactly.
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_redirect_match() {
        let client = Client::new(
            "portal".into(),
            "Portal".into(),
            vec!["https://portal.example.com/callback".into()],
        );

        assert!(client.allows_redirect("https://portal.example.com/callback"));
        assert!(!client.allows_redirect("https://portal.example.com/callback/"));
        assert!(!client.allows_redirect("https://evil.example.com/callback"));
    }
}
