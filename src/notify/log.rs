use crate::models::Listing;
use crate::notify::{subject, Notifier};
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, listing: &Listing) -> Result<()> {
        info!(
            to,
            subject = %subject(listing),
            url = %listing.url,
            price = listing.price,
            "would notify"
        );
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "log"
    }
}
