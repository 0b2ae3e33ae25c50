//! Run orchestration: fetch every rule's page, find what is new since the
//! rule's watermark, notify, and store the next watermark.
//!
//! ```text
//! list_rules ─► fetch distinct pages (bounded) ─► per rule (bounded):
//!     extract ─► compute_cutoffs ─► split_new ─► filter ─► notify ─► put_rule
//! ```

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;

use crate::config::ConcurrencyConfig;
use crate::filter::{compute_cutoffs, rule as rule_filter, split_new};
use crate::models::{Listing, RetrievalRule};
use crate::notify::Notifier;
use crate::scrapers::{BoardExtractor, Fetcher, Layout, PageRequest};
use crate::store::RuleStore;

/// Pipeline step a rule failed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Fetch,
    Extract,
    Notify,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Notify => "notify",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleStatus {
    /// Watermark replaced with the current page's leading ids
    Updated,
    /// Page parsed but held no usable listings; watermark left alone
    Skipped,
    Failed { stage: Stage, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub rule: String,
    pub status: RuleStatus,
    pub notified: usize,
}

/// Outcome of one tick, one entry per rule in store order
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<RuleOutcome>,
}

impl RunReport {
    pub fn notified(&self) -> usize {
        self.outcomes.iter().map(|o| o.notified).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, RuleStatus::Failed { .. }))
    }

    /// Fetch and parse failures are transient and only logged. Failed sends
    /// and failed watermark writes are errors for the caller.
    pub fn into_result(self) -> Result<Self> {
        let fatal: Vec<String> = self
            .failures()
            .filter_map(|o| match &o.status {
                RuleStatus::Failed { stage, error } if matches!(stage, Stage::Notify | Stage::Persist) => {
                    Some(format!("{} ({stage}): {error}", o.rule))
                }
                _ => None,
            })
            .collect();

        if fatal.is_empty() {
            Ok(self)
        } else {
            anyhow::bail!("{} rule(s) failed: {}", fatal.len(), fatal.join("; "))
        }
    }
}

type PageResult = Result<String, String>;

pub struct Reporter {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn RuleStore>,
    notifier: Arc<dyn Notifier>,
    base_url: Url,
    limits: ConcurrencyConfig,
}

impl Reporter {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn RuleStore>,
        notifier: Arc<dyn Notifier>,
        base_url: Url,
        limits: ConcurrencyConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            notifier,
            base_url,
            limits,
        }
    }

    /// One tick over every stored rule.
    ///
    /// Only an unavailable rule store fails the whole run; everything else
    /// is isolated to its rule and reported in the [`RunReport`].
    pub async fn run(&self) -> Result<RunReport> {
        let rules = self
            .store
            .list_rules()
            .await
            .context("Failed to load retrieval rules")?;

        info!(
            rules = rules.len(),
            fetcher = self.fetcher.backend_name(),
            notifier = self.notifier.backend_name(),
            "starting run"
        );

        let requests: Vec<Result<PageRequest, String>> = rules
            .iter()
            .map(|rule| {
                PageRequest::resolve(&self.base_url, &rule.url, &rule.params)
                    .map_err(|e| format!("invalid url {:?}: {e}", rule.url))
            })
            .collect();

        let pages = self.fetch_pages(&requests).await;

        let outcomes: Vec<RuleOutcome> = stream::iter(rules.into_iter().zip(requests))
            .map(|(rule, request)| {
                let span = info_span!("rule", rule = %rule.name);
                self.process_rule(rule, request, &pages).instrument(span)
            })
            .buffered(self.limits.pages)
            .collect()
            .await;

        let report = RunReport { outcomes };
        for outcome in &report.outcomes {
            match &outcome.status {
                RuleStatus::Failed { stage, error } => {
                    error!(rule = %outcome.rule, %stage, %error, "rule failed")
                }
                status => info!(rule = %outcome.rule, ?status, notified = outcome.notified, "rule done"),
            }
        }
        info!(notified = report.notified(), "run finished");

        Ok(report)
    }

    /// Repeat [`run`](Self::run) every `interval` until interrupted.
    pub async fn watch(&self, interval: Duration) -> Result<()> {
        self.watch_until(interval, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Repeat [`run`](Self::run) every `interval` until `shutdown` resolves,
    /// abandoning a run that is still in progress at that point.
    pub async fn watch_until<F>(&self, interval: Duration, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => {
                    info!("interrupted, stopping");
                    return Ok(());
                }
            }

            tokio::select! {
                result = self.run() => {
                    if let Err(e) = result.and_then(RunReport::into_result) {
                        error!("run failed: {e:#}");
                    }
                }
                _ = &mut shutdown => {
                    info!("interrupted during run, stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Fetch each distinct page once, however many rules share it.
    async fn fetch_pages(
        &self,
        requests: &[Result<PageRequest, String>],
    ) -> HashMap<PageRequest, PageResult> {
        let distinct: BTreeSet<&PageRequest> = requests.iter().flatten().collect();
        debug!(pages = distinct.len(), "fetching pages");

        stream::iter(distinct)
            .map(|request| async move {
                let page = self
                    .fetcher
                    .fetch(request)
                    .await
                    .map_err(|e| format!("{e:#}"));
                if let Err(e) = &page {
                    warn!(url = %request.url, error = %e, "page fetch failed");
                }
                (request.clone(), page)
            })
            .buffer_unordered(self.limits.pages)
            .collect()
            .await
    }

    async fn process_rule(
        &self,
        rule: RetrievalRule,
        request: Result<PageRequest, String>,
        pages: &HashMap<PageRequest, PageResult>,
    ) -> RuleOutcome {
        let failed = |stage, error: String| RuleOutcome {
            rule: rule.name.clone(),
            status: RuleStatus::Failed { stage, error },
            notified: 0,
        };

        let request = match request {
            Ok(request) => request,
            Err(e) => return failed(Stage::Resolve, e),
        };
        let html = match pages.get(&request) {
            Some(Ok(html)) => html,
            Some(Err(e)) => return failed(Stage::Fetch, e.clone()),
            None => return failed(Stage::Fetch, "page was not fetched".to_string()),
        };

        let listings = match BoardExtractor::new(Layout::from(rule.layout), request.url)
            .and_then(|extractor| extractor.extract(html))
        {
            Ok(listings) => listings,
            Err(e) => return failed(Stage::Extract, e.to_string()),
        };

        self.process_listings(rule, &listings).await
    }

    /// Everything after extraction: novelty, filtering, notification and
    /// the watermark write.
    pub async fn process_listings(
        &self,
        mut rule: RetrievalRule,
        listings: &[Listing],
    ) -> RuleOutcome {
        log_listings("unfiltered", listings);

        if listings.is_empty() {
            warn!("no usable listings on page, keeping stored cutoffs");
            return RuleOutcome {
                rule: rule.name,
                status: RuleStatus::Skipped,
                notified: 0,
            };
        }

        let new_cutoffs = compute_cutoffs(listings);
        info!(cutoffs = %new_cutoffs.join(", "), "new cutoffs");

        let novel = split_new(listings, &rule.cutoffs);
        log_listings("cutoff filtered", novel);

        let matched = rule_filter::apply(novel, &rule.filters);
        log_listings("rules filtered", &matched);

        let mut notified = 0;
        let mut notify_error = None;
        if rule.is_seeded() {
            let (sent, result) = self.notify_all(&rule.email, &matched).await;
            notified = sent;
            info!(sent, matched = matched.len(), "sent notifications");
            notify_error = result.err();
        } else {
            info!(
                matched = matched.len(),
                "first run for rule, seeding cutoffs without notifying"
            );
        }

        // Advance the watermark even after a failed send; there is no retry queue.
        rule.cutoffs = new_cutoffs;
        if let Err(e) = self.store.put_rule(&rule).await {
            return RuleOutcome {
                rule: rule.name,
                status: RuleStatus::Failed {
                    stage: Stage::Persist,
                    error: format!("{e:#}"),
                },
                notified,
            };
        }

        let status = match notify_error {
            Some(e) => RuleStatus::Failed {
                stage: Stage::Notify,
                error: format!("{e:#}"),
            },
            None => RuleStatus::Updated,
        };

        RuleOutcome {
            rule: rule.name,
            status,
            notified,
        }
    }

    /// Send with bounded concurrency, stopping at the first failure.
    /// Returns how many sends succeeded alongside the first error.
    async fn notify_all(&self, to: &str, listings: &[Listing]) -> (usize, Result<()>) {
        let sent = AtomicUsize::new(0);

        let result = stream::iter(listings)
            .map(Ok::<_, anyhow::Error>)
            .try_for_each_concurrent(self.limits.notifications, |listing| {
                let sent = &sent;
                async move {
                    self.notifier
                        .send(to, listing)
                        .await
                        .with_context(|| format!("Failed to notify {to} about {}", listing.id))?;
                    sent.fetch_add(1, Ordering::Relaxed);
                    Ok::<(), anyhow::Error>(())
                }
            })
            .await;

        (sent.load(Ordering::Relaxed), result)
    }
}

fn log_listings(stage: &str, listings: &[Listing]) {
    debug!(stage, count = listings.len(), "listings");
    for listing in listings {
        debug!(
            stage,
            id = %listing.id,
            url = %listing.url,
            title = %listing.title.replace('\n', " "),
            price = listing.price,
            "listing"
        );
    }
}
