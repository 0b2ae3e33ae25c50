use crate::scrapers::types::PageRequest;
use anyhow::Result;
use async_trait::async_trait;

/// Downloads raw board pages.
/// One best-effort attempt per call; retries and caching belong to callers.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the page body
    async fn fetch(&self, request: &PageRequest) -> Result<String>;

    /// Get the name of the fetch backend
    fn backend_name(&self) -> &'static str;
}
