use crate::scrapers::traits::Fetcher;
use crate::scrapers::types::PageRequest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Fetcher that renders pages in headless Chrome
pub struct BrowserFetcher {
    browser: Arc<Browser>,
    settle: Duration,
    debug_dir: Option<PathBuf>,
}

/// Slack on top of the longest expected gap between fetches
const IDLE_MARGIN: Duration = Duration::from_secs(300);

impl BrowserFetcher {
    /// Launch the browser used for every fetch.
    ///
    /// `max_idle` is the longest the browser may sit without a fetch, usually
    /// the watch interval. Chrome drops the connection once it is exceeded.
    pub fn new(settle: Duration, max_idle: Duration, debug_dir: Option<PathBuf>) -> Result<Self> {
        info!("Launching headless Chrome...");

        let browser =
            Browser::new(launch_options(max_idle)?).context("Failed to launch Chrome browser")?;

        Ok(Self {
            browser: Arc::new(browser),
            settle,
            debug_dir,
        })
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<String> {
        let url = navigation_url(request);
        let browser = Arc::clone(&self.browser);
        let settle = self.settle;
        let debug_dir = self.debug_dir.clone();

        // headless_chrome blocks; keep it off the runtime threads
        tokio::task::spawn_blocking(move || render(&browser, &url, settle, debug_dir))
            .await
            .context("Browser task panicked")?
    }

    fn backend_name(&self) -> &'static str {
        "browser"
    }
}

fn launch_options(max_idle: Duration) -> Result<LaunchOptions<'static>> {
    LaunchOptions::default_builder()
        .headless(true)
        .idle_browser_timeout(max_idle + IDLE_MARGIN)
        .build()
        .context("Failed to build launch options")
}

/// A browser can't replay a form post, so parameters travel as a query.
fn navigation_url(request: &PageRequest) -> Url {
    let mut url = request.url.clone();
    if request.is_form() {
        url.query_pairs_mut().extend_pairs(request.params.iter());
    }
    url
}

fn render(
    browser: &Browser,
    url: &Url,
    settle: Duration,
    debug_dir: Option<PathBuf>,
) -> Result<String> {
    debug!(%url, "opening page in browser");
    let tab = browser.new_tab()?;

    let html = closing(
        &tab,
        |tab| read_page(tab, url, settle),
        |tab| {
            if let Err(e) = tab.close(true) {
                debug!(%url, "failed to close tab: {e}");
            }
        },
    )?;

    if html.is_empty() {
        warn!(%url, "browser returned empty HTML");
        anyhow::bail!("Empty page from {url}");
    }

    if let Some(dir) = debug_dir {
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(debug_file_name(url));
        std::fs::write(&path, &html)?;
        info!("Saved page HTML to {} ({} bytes)", path.display(), html.len());
    }

    Ok(html)
}

/// Run `body` against `tab`, then `close` it whether or not `body` failed.
fn closing<T, R>(
    tab: &T,
    body: impl FnOnce(&T) -> Result<R>,
    close: impl FnOnce(&T),
) -> Result<R> {
    let result = body(tab);
    close(tab);
    result
}

fn read_page(tab: &Tab, url: &Url, settle: Duration) -> Result<String> {
    tab.navigate_to(url.as_str())?;
    tab.wait_until_navigated()?;

    // Give client-side rendering time to finish
    thread::sleep(settle);

    // Accept cookies if present
    let _ = tab.evaluate(
        r#"
        const button = document.querySelector('button[id*="accept"], button[id*="agree"]');
        if (button) button.click();
        "#,
        false,
    );

    let html_result = tab.evaluate("document.documentElement.outerHTML", false)?;
    Ok(html_result
        .value
        .as_ref()
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .unwrap_or_default())
}

fn debug_file_name(url: &Url) -> String {
    let slug: String = url
        .path()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("page{}.html", slug.trim_end_matches('_'))
}
