use crate::models::Listing;
use crate::notify::{render_listing, subject, Notifier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// OAuth client as downloaded from the Google console
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<ClientCredentials>,
    web: Option<ClientCredentials>,
}

/// Stored user token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl Token {
    /// Usable for at least another minute
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expiry
            .map_or(true, |expiry| expiry - ChronoDuration::seconds(60) > now)
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// Sends listings as HTML mail through the Gmail API
pub struct GmailNotifier {
    client: Client,
    sender: String,
    credentials: ClientCredentials,
    token: Mutex<Token>,
}

impl GmailNotifier {
    pub fn new(
        credentials: ClientCredentials,
        token: Token,
        sender: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            sender: sender.into(),
            credentials,
            token: Mutex::new(token),
        })
    }

    /// Load the OAuth client and token files
    pub async fn from_files(
        credentials_path: &Path,
        token_path: &Path,
        sender: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let raw = tokio::fs::read_to_string(credentials_path)
            .await
            .with_context(|| format!("Failed to read {}", credentials_path.display()))?;
        let file: CredentialsFile =
            serde_json::from_str(&raw).context("Failed to parse OAuth client credentials")?;
        let credentials = file
            .installed
            .or(file.web)
            .context("Credentials file has neither an installed nor a web client")?;

        let raw = tokio::fs::read_to_string(token_path)
            .await
            .with_context(|| format!("Failed to read {}", token_path.display()))?;
        let token: Token = serde_json::from_str(&raw).context("Failed to parse OAuth token")?;

        Self::new(credentials, token, sender, timeout)
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if token.is_fresh(Utc::now()) {
            return Ok(token.access_token.clone());
        }

        let refresh_token = token
            .refresh_token
            .clone()
            .context("OAuth token expired and has no refresh token")?;

        info!("Refreshing Gmail access token");
        let response = self
            .client
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .context("Token refresh request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Token refresh returned {}: {}", status, body);
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .context("Failed to parse token refresh response")?;

        token.access_token = refreshed.access_token;
        token.expiry = refreshed
            .expires_in
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));

        Ok(token.access_token.clone())
    }
}

#[async_trait]
impl Notifier for GmailNotifier {
    async fn send(&self, to: &str, listing: &Listing) -> Result<()> {
        let raw = encode_message(&self.sender, to, &subject(listing), &render_listing(listing));
        let access_token = self.access_token().await?;

        let response = self
            .client
            .post(SEND_URL)
            .bearer_auth(access_token)
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .with_context(|| format!("Failed to send listing {} to {}", listing.id, to))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gmail returned {} for listing {}: {}", status, listing.id, body);
        }

        debug!(to, id = %listing.id, "sent listing");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "gmail"
    }
}

/// RFC 2822 HTML message, base64url encoded as the Gmail API wants it.
fn encode_message(from: &str, to: &str, subject: &str, html: &str) -> String {
    let message = format!(
        "From: {from}\r\n\
         To: {to}\r\n\
         Subject: {subject}\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         Content-Transfer-Encoding: 8bit\r\n\
         \r\n\
         {html}"
    );
    URL_SAFE_NO_PAD.encode(message)
}
