use crate::scrapers::traits::Fetcher;
use crate::scrapers::types::PageRequest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Plain HTTP fetcher.
///
/// Filtered board views are form posts that only work inside a site
/// session, so form requests first visit the site root to pick up cookies.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .cookie_store(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    async fn open_session(&self, request: &PageRequest) -> Result<()> {
        let mut root = request.url.clone();
        root.set_path("/");
        root.set_query(None);

        debug!(url = %root, "opening site session");
        let response = self
            .client
            .get(root.clone())
            .send()
            .await
            .with_context(|| format!("Failed to open session at {root}"))?;
        check_status(response)?;
        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<String> {
        let sent = if request.is_form() {
            self.open_session(request).await?;
            debug!(url = %request.url, params = request.params.len(), "posting board form");
            self.client
                .post(request.url.clone())
                .form(&request.params)
                .send()
                .await
        } else {
            debug!(url = %request.url, "fetching board page");
            self.client.get(request.url.clone()).send().await
        };
        let response = sent.with_context(|| format!("Failed to fetch {}", request.url))?;

        let html = check_status(response)?
            .text()
            .await
            .context("Failed to read response body")?;

        debug!("Downloaded {} bytes of HTML", html.len());
        Ok(html)
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        warn!(url = %response.url(), %status, "site returned error status");
        anyhow::bail!("HTTP {} for {}", status, response.url());
    }
    Ok(response)
}
