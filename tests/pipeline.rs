use anyhow::{anyhow, Result};
use async_trait::async_trait;
use listing_reporter::config::ConcurrencyConfig;
use listing_reporter::models::{Filters, Listing, RangeFilter, RetrievalRule};
use listing_reporter::notify::Notifier;
use listing_reporter::reporter::{Reporter, RuleStatus, Stage};
use listing_reporter::scrapers::{Fetcher, PageRequest};
use listing_reporter::store::{MemoryRuleStore, RuleStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const SITE: &str = "https://www.ss.lv";
const FLATS: &str = "/lv/real-estate/flats/riga/centre/sell/";
const HOUSES: &str = "/lv/real-estate/homes-summer-residences/riga/sell/";

/// Serves canned pages keyed by absolute url
#[derive(Default)]
struct FakeFetcher {
    pages: HashMap<String, Result<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn page(mut self, path: &str, html: String) -> Self {
        self.pages.insert(format!("{SITE}{path}"), Ok(html));
        self
    }

    fn failing(mut self, path: &str) -> Self {
        self.pages
            .insert(format!("{SITE}{path}"), Err("connection reset".to_string()));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.url.to_string());
        match self.pages.get(request.url.as_str()) {
            Some(Ok(html)) => Ok(html.clone()),
            Some(Err(e)) => Err(anyhow!(e.clone())),
            None => Err(anyhow!("404 for {}", request.url)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }
}

/// Records sends; fails for listing ids in `fail_ids`
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail_ids: Vec<String>,
}

impl RecordingNotifier {
    fn failing_on(id: &str) -> Self {
        Self {
            fail_ids: vec![id.to_string()],
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<(String, String)> {
        let mut sent = self.sent.lock().unwrap().clone();
        sent.sort();
        sent
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, listing: &Listing) -> Result<()> {
        if self.fail_ids.contains(&listing.id) {
            return Err(anyhow!("mail quota exceeded"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), listing.id.clone()));
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

/// Reads from memory but refuses every write
struct ReadOnlyStore(MemoryRuleStore);

#[async_trait]
impl RuleStore for ReadOnlyStore {
    async fn list_rules(&self) -> Result<Vec<RetrievalRule>> {
        self.0.list_rules().await
    }
    async fn put_rule(&self, _rule: &RetrievalRule) -> Result<()> {
        Err(anyhow!("table is read only"))
    }
    async fn put_rules_batch(&self, _rules: &[RetrievalRule]) -> Result<()> {
        Err(anyhow!("table is read only"))
    }
    async fn delete_rule(&self, _name: &str) -> Result<()> {
        Err(anyhow!("table is read only"))
    }
}

/// Never answers, like a site that accepted the connection and went quiet
struct StalledFetcher;

#[async_trait]
impl Fetcher for StalledFetcher {
    async fn fetch(&self, _request: &PageRequest) -> Result<String> {
        std::future::pending().await
    }

    fn backend_name(&self) -> &'static str {
        "stalled"
    }
}

struct UnavailableStore;

#[async_trait]
impl RuleStore for UnavailableStore {
    async fn list_rules(&self) -> Result<Vec<RetrievalRule>> {
        Err(anyhow!("no such table"))
    }
    async fn put_rule(&self, _rule: &RetrievalRule) -> Result<()> {
        unreachable!()
    }
    async fn put_rules_batch(&self, _rules: &[RetrievalRule]) -> Result<()> {
        unreachable!()
    }
    async fn delete_rule(&self, _name: &str) -> Result<()> {
        unreachable!()
    }
}

fn row(id: &str, price: u32) -> String {
    format!(
        r#"<tr id="tr_{id}">
            <td><input type=checkbox></td>
            <td><a href="/msg/{id}.html"><img src="https://i.ss.lv/{id}.th2.jpg"></a></td>
            <td><div class=d1><a href="/msg/{id}.html">Flat {id}</a></div></td>
            <td>Brivibas {id}</td><td>2</td><td>54</td><td>3/5</td><td>LT proj.</td>
            <td>1,000 €</td><td>{price}  €</td>
        </tr>"#
    )
}

fn board(rows: &[(&str, u32)]) -> String {
    let rows: String = rows.iter().map(|(id, price)| row(id, *price)).collect();
    format!("<html><body><table><tr id=\"head_line\"><td>x</td></tr>{rows}</table></body></html>")
}

fn board_ids(ids: &[&str]) -> String {
    let rows: Vec<(&str, u32)> = ids.iter().map(|id| (*id, 100_000)).collect();
    board(&rows)
}

fn rule(name: &str, url: &str, cutoffs: &[&str]) -> RetrievalRule {
    let mut rule = RetrievalRule::new(name, format!("{name}@example.com"), url);
    rule.cutoffs = cutoffs.iter().map(|c| c.to_string()).collect();
    rule
}

fn reporter(
    fetcher: Arc<FakeFetcher>,
    store: Arc<dyn RuleStore>,
    notifier: Arc<RecordingNotifier>,
) -> Reporter {
    reporter_with_limits(fetcher, store, notifier, ConcurrencyConfig::default())
}

fn reporter_with_limits(
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn RuleStore>,
    notifier: Arc<RecordingNotifier>,
    limits: ConcurrencyConfig,
) -> Reporter {
    Reporter::new(fetcher, store, notifier, Url::parse(SITE).unwrap(), limits)
}

async fn cutoffs(store: &MemoryRuleStore, name: &str) -> Vec<String> {
    store.get(name).await.unwrap().cutoffs
}

#[tokio::test]
async fn first_run_seeds_without_notifying() {
    let fetcher = Arc::new(FakeFetcher::default().page(FLATS, board_ids(&["10", "9", "8", "7"])));
    let store = Arc::new(MemoryRuleStore::with_rules([rule("flats", FLATS, &[])]));
    let notifier = Arc::new(RecordingNotifier::default());

    let report = reporter(fetcher, store.clone(), notifier.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].status, RuleStatus::Updated);
    assert_eq!(report.notified(), 0);
    assert!(notifier.sent().is_empty());
    assert_eq!(cutoffs(&store, "flats").await, ["10", "9", "8"]);
}

#[tokio::test]
async fn notifies_listings_above_watermark() {
    let fetcher = Arc::new(FakeFetcher::default().page(FLATS, board_ids(&["10", "9", "8"])));
    let store = Arc::new(MemoryRuleStore::with_rules([rule("flats", FLATS, &["9"])]));
    let notifier = Arc::new(RecordingNotifier::default());

    let report = reporter(fetcher, store.clone(), notifier.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].notified, 1);
    assert_eq!(
        notifier.sent(),
        [("flats@example.com".to_string(), "10".to_string())]
    );
    assert_eq!(cutoffs(&store, "flats").await, ["10", "9", "8"]);
}

#[tokio::test]
async fn rotated_off_watermark_id_still_finds_boundary() {
    let fetcher =
        Arc::new(FakeFetcher::default().page(FLATS, board_ids(&["11", "10", "9", "8"])));
    let store = Arc::new(MemoryRuleStore::with_rules([rule("flats", FLATS, &["9", "7"])]));
    let notifier = Arc::new(RecordingNotifier::default());

    reporter(fetcher, store.clone(), notifier.clone())
        .run()
        .await
        .unwrap();

    let ids: Vec<String> = notifier.sent().into_iter().map(|(_, id)| id).collect();
    assert_eq!(ids, ["10", "11"]);
    assert_eq!(cutoffs(&store, "flats").await, ["11", "10", "9"]);
}

#[tokio::test]
async fn second_run_on_unchanged_page_is_quiet() {
    let fetcher = Arc::new(FakeFetcher::default().page(FLATS, board_ids(&["12", "11", "10"])));
    let store = Arc::new(MemoryRuleStore::with_rules([rule("flats", FLATS, &["10"])]));
    let notifier = Arc::new(RecordingNotifier::default());
    let reporter = reporter(fetcher, store.clone(), notifier.clone());

    assert_eq!(reporter.run().await.unwrap().notified(), 2);
    assert_eq!(reporter.run().await.unwrap().notified(), 0);
    assert_eq!(notifier.sent().len(), 2);
}

#[tokio::test]
async fn filters_narrow_the_new_listings() {
    let fetcher = Arc::new(FakeFetcher::default().page(
        FLATS,
        board(&[("4", 250_000), ("3", 90_000), ("2", 0), ("1", 80_000)]),
    ));
    let mut cheap = rule("cheap", FLATS, &["1"]);
    cheap.filters = Filters {
        price: Some(RangeFilter::new(None, Some(100_000.0))),
        ..Filters::default()
    };
    let mut nonzero = rule("nonzero", FLATS, &["1"]);
    nonzero.filters = Filters {
        price: Some(RangeFilter::new(Some(1.0), None)),
        ..Filters::default()
    };
    let store = Arc::new(MemoryRuleStore::with_rules([cheap, nonzero]));
    let notifier = Arc::new(RecordingNotifier::default());

    reporter(fetcher, store.clone(), notifier.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(
        notifier.sent(),
        [
            ("cheap@example.com".to_string(), "2".to_string()),
            ("cheap@example.com".to_string(), "3".to_string()),
            ("nonzero@example.com".to_string(), "3".to_string()),
            ("nonzero@example.com".to_string(), "4".to_string()),
        ]
    );
    // watermark comes from the whole page, not the filtered set
    assert_eq!(cutoffs(&store, "cheap").await, ["4", "3", "2"]);
}

#[tokio::test]
async fn fetch_failure_is_isolated_to_its_rule() {
    let fetcher = Arc::new(
        FakeFetcher::default()
            .failing(HOUSES)
            .page(FLATS, board_ids(&["5", "4"])),
    );
    let store = Arc::new(MemoryRuleStore::with_rules([
        rule("flats", FLATS, &["4"]),
        rule("houses", HOUSES, &["77"]),
    ]));
    let notifier = Arc::new(RecordingNotifier::default());

    let report = reporter(fetcher, store.clone(), notifier.clone())
        .run()
        .await
        .unwrap();

    let flats = report.outcomes.iter().find(|o| o.rule == "flats").unwrap();
    let houses = report.outcomes.iter().find(|o| o.rule == "houses").unwrap();
    assert_eq!(flats.status, RuleStatus::Updated);
    assert!(matches!(
        houses.status,
        RuleStatus::Failed {
            stage: Stage::Fetch,
            ..
        }
    ));
    assert_eq!(cutoffs(&store, "houses").await, ["77"]);
    assert_eq!(cutoffs(&store, "flats").await, ["5", "4"]);
    // fetch failures are logged, not escalated
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn unparseable_page_keeps_watermark() {
    let fetcher = Arc::new(
        FakeFetcher::default()
            .page(FLATS, "<html><body>Service unavailable</body></html>".to_string())
            .page(
                HOUSES,
                board_ids(&[]).replace(
                    "</table>",
                    r#"<tr id="tr_1"><td>broken</td></tr></table>"#,
                ),
            ),
    );
    let store = Arc::new(MemoryRuleStore::with_rules([
        rule("flats", FLATS, &["9"]),
        rule("houses", HOUSES, &["3"]),
    ]));
    let notifier = Arc::new(RecordingNotifier::default());

    let report = reporter(fetcher, store.clone(), notifier)
        .run()
        .await
        .unwrap();

    let flats = report.outcomes.iter().find(|o| o.rule == "flats").unwrap();
    let houses = report.outcomes.iter().find(|o| o.rule == "houses").unwrap();
    assert!(matches!(
        flats.status,
        RuleStatus::Failed {
            stage: Stage::Extract,
            ..
        }
    ));
    assert_eq!(houses.status, RuleStatus::Skipped);
    assert_eq!(cutoffs(&store, "flats").await, ["9"]);
    assert_eq!(cutoffs(&store, "houses").await, ["3"]);
}

#[tokio::test]
async fn rules_on_the_same_page_share_one_fetch() {
    let fetcher = Arc::new(FakeFetcher::default().page(FLATS, board_ids(&["2", "1"])));
    let store = Arc::new(MemoryRuleStore::with_rules([
        rule("a", FLATS, &["1"]),
        rule("b", FLATS, &["1"]),
        rule("c", &format!("{SITE}{FLATS}"), &["1"]),
    ]));
    let notifier = Arc::new(RecordingNotifier::default());

    let report = reporter(fetcher.clone(), store, notifier.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(fetcher.calls().len(), 1);
    assert_eq!(report.notified(), 3);
}

#[tokio::test]
async fn failed_send_is_reported_and_watermark_still_advances() {
    let fetcher = Arc::new(FakeFetcher::default().page(FLATS, board_ids(&["3", "2", "1"])));
    let store = Arc::new(MemoryRuleStore::with_rules([rule("flats", FLATS, &["1"])]));
    let notifier = Arc::new(RecordingNotifier::failing_on("2"));

    let report = reporter(fetcher, store.clone(), notifier)
        .run()
        .await
        .unwrap();

    assert!(matches!(
        report.outcomes[0].status,
        RuleStatus::Failed {
            stage: Stage::Notify,
            ..
        }
    ));
    assert_eq!(cutoffs(&store, "flats").await, ["3", "2", "1"]);
    assert!(report.into_result().is_err());
}

#[tokio::test]
async fn failed_send_stops_the_remaining_sends() {
    let fetcher =
        Arc::new(FakeFetcher::default().page(FLATS, board_ids(&["5", "4", "3", "2", "1"])));
    let store = Arc::new(MemoryRuleStore::with_rules([rule("flats", FLATS, &["1"])]));
    let notifier = Arc::new(RecordingNotifier::failing_on("4"));
    let limits = ConcurrencyConfig {
        notifications: 1,
        ..ConcurrencyConfig::default()
    };

    let report = reporter_with_limits(fetcher, store.clone(), notifier.clone(), limits)
        .run()
        .await
        .unwrap();

    assert_eq!(notifier.sent(), [("flats@example.com".to_string(), "5".to_string())]);
    assert_eq!(report.outcomes[0].notified, 1);
    assert!(matches!(
        report.outcomes[0].status,
        RuleStatus::Failed {
            stage: Stage::Notify,
            ..
        }
    ));
    assert_eq!(cutoffs(&store, "flats").await, ["5", "4", "3"]);
}

#[tokio::test]
async fn shutdown_interrupts_a_run_in_progress() {
    let store = Arc::new(MemoryRuleStore::with_rules([rule("flats", FLATS, &["1"])]));
    let reporter = reporter_with_limits(
        Arc::new(StalledFetcher),
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        ConcurrencyConfig::default(),
    );

    let watched = tokio::time::timeout(
        Duration::from_secs(5),
        reporter.watch_until(
            Duration::from_secs(3600),
            tokio::time::sleep(Duration::from_millis(50)),
        ),
    )
    .await;

    assert!(watched.expect("shutdown was not observed mid-run").is_ok());
    assert_eq!(cutoffs(&store, "flats").await, ["1"]);
}

#[tokio::test]
async fn failed_watermark_write_is_an_error() {
    let fetcher = Arc::new(FakeFetcher::default().page(FLATS, board_ids(&["3", "2"])));
    let store = Arc::new(ReadOnlyStore(MemoryRuleStore::with_rules([rule(
        "flats",
        FLATS,
        &["2"],
    )])));
    let notifier = Arc::new(RecordingNotifier::default());

    let report = reporter(fetcher, store, notifier.clone())
        .run()
        .await
        .unwrap();

    // the send already happened before the write failed
    assert_eq!(report.outcomes[0].notified, 1);
    assert!(matches!(
        report.outcomes[0].status,
        RuleStatus::Failed {
            stage: Stage::Persist,
            ..
        }
    ));
    let err = report.into_result().unwrap_err();
    assert!(err.to_string().contains("flats (persist)"));
}

#[tokio::test]
async fn unavailable_store_fails_the_run() {
    let fetcher = Arc::new(FakeFetcher::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let err = reporter(fetcher.clone(), Arc::new(UnavailableStore), notifier)
        .run()
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("no such table"));
    assert!(fetcher.calls().is_empty());
}
