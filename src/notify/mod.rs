pub mod gmail;
pub mod log;

pub use gmail::GmailNotifier;
pub use log::LogNotifier;

use crate::models::Listing;
use anyhow::Result;
use async_trait::async_trait;

/// Delivers one listing to one recipient.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, listing: &Listing) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}

pub fn subject(listing: &Listing) -> String {
    format!("listing {}", listing.id)
}

/// Listing as a two-column HTML table, fields in a fixed order.
pub fn render_listing(listing: &Listing) -> String {
    let url = escape(&listing.url);
    let rows = [
        ("url", format!(r#"<a href="{url}">{url}</a>"#)),
        (
            "image",
            format!(r#"<img src="{}">"#, escape(&listing.image_url)),
        ),
        ("price", format!("{:.2}", listing.price)),
        ("title", escape(&listing.title)),
        ("street", escape(&listing.street)),
        ("rooms", listing.rooms.to_string()),
        ("area", format!("{:.2}", listing.area)),
        (
            "floor",
            format!("{}/{}", listing.floor, listing.floor_count),
        ),
        ("series", escape(&listing.series)),
    ];

    let body: String = rows
        .iter()
        .map(|(name, value)| format!("<tr><td>{name}</td><td>{value}</td></tr>\n"))
        .collect();

    format!(r#"<table border="1" cellpadding="10" cellspacing="0">{body}</table>"#)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
