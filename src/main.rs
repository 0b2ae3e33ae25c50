use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use listing_reporter::config::{Config, FetcherKind, NotifierKind, DEFAULT_CONFIG_PATH};
use listing_reporter::models::RetrievalRule;
use listing_reporter::notify::{GmailNotifier, LogNotifier, Notifier};
use listing_reporter::reporter::Reporter;
use listing_reporter::scrapers::{BoardExtractor, BrowserFetcher, Fetcher, HttpFetcher, Layout, LayoutKind};
use listing_reporter::store::{put_rules_chunked, JsonFileRuleStore, MemoryRuleStore, RuleStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "listing-reporter", version, about = "Report new classified listings by email")]
struct Cli {
    /// Config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log notifications instead of sending them and never write the rule store
    #[arg(long, global = true)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every rule once
    Run,
    /// Process every rule on a fixed interval
    Watch {
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Extract listings from a saved page and print them as JSON
    Parse {
        file: PathBuf,
        #[arg(long, value_enum, default_value = "subsection")]
        layout: LayoutArg,
        /// Page url that relative links resolve against
        #[arg(long)]
        page_url: Option<Url>,
    },
    /// Manage stored rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
}

#[derive(Subcommand)]
enum RulesCommand {
    /// Print stored rules as JSON
    List,
    /// Insert or replace one rule from a JSON file
    Put { file: PathBuf },
    /// Insert or replace every rule in a JSON array file
    Import { file: PathBuf },
    /// Remove a rule
    Delete { name: String },
    /// Forget a rule's cutoffs so the next run seeds them silently
    Reset { name: String },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum LayoutArg {
    Subsection,
    TopLevel,
}

impl From<LayoutArg> for LayoutKind {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Subsection => LayoutKind::Subsection,
            LayoutArg::TopLevel => LayoutKind::TopLevel,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Run => {
            let reporter = build_reporter(&config, cli.dry_run, config.schedule.interval()).await?;
            reporter.run().await?.into_result()?;
        }
        Command::Watch { interval_secs } => {
            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.schedule.interval());
            if interval.is_zero() {
                anyhow::bail!("watch interval must be positive");
            }
            let reporter = build_reporter(&config, cli.dry_run, interval).await?;
            info!("Watching every {}s", interval.as_secs());
            reporter.watch(interval).await?;
        }
        Command::Parse {
            file,
            layout,
            page_url,
        } => {
            let page_url = match page_url {
                Some(url) => url,
                None => config.site.url()?,
            };
            parse_file(&file, layout.into(), page_url)?
        }
        Command::Rules { command } => {
            let store = JsonFileRuleStore::new(&config.store.path);
            manage_rules(&store, command, cli.dry_run).await?;
        }
    }

    Ok(())
}

/// `interval` is the longest gap between runs the fetcher has to survive.
async fn build_reporter(config: &Config, dry_run: bool, interval: Duration) -> Result<Reporter> {
    let fetcher: Arc<dyn Fetcher> = match config.fetcher {
        FetcherKind::Http => Arc::new(HttpFetcher::new(
            config.http.timeout(),
            &config.http.user_agent,
        )?),
        FetcherKind::Browser => Arc::new(BrowserFetcher::new(
            Duration::from_secs(config.browser.settle_secs),
            interval,
            config.browser.debug_dir.clone(),
        )?),
    };

    let file_store = JsonFileRuleStore::new(&config.store.path);
    let (store, notifier): (Arc<dyn RuleStore>, Arc<dyn Notifier>) = if dry_run {
        info!("Dry run: notifications are logged and cutoffs are not saved");
        let rules = file_store.list_rules().await?;
        (
            Arc::new(MemoryRuleStore::with_rules(rules)),
            Arc::new(LogNotifier),
        )
    } else {
        let notifier: Arc<dyn Notifier> = match config.notifier.kind {
            NotifierKind::Log => Arc::new(LogNotifier),
            NotifierKind::Gmail => Arc::new(
                GmailNotifier::from_files(
                    &config.notifier.credentials_path,
                    &config.notifier.token_path,
                    config.notifier.sender.clone(),
                    config.http.timeout(),
                )
                .await
                .context("Failed to set up Gmail notifier")?,
            ),
        };
        (Arc::new(file_store), notifier)
    };

    Ok(Reporter::new(
        fetcher,
        store,
        notifier,
        config.site.url()?,
        config.concurrency,
    ))
}

fn parse_file(path: &Path, layout: LayoutKind, page_url: Url) -> Result<()> {
    let html = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let listings = BoardExtractor::new(Layout::from(layout), page_url)?.extract(&html)?;
    info!("Extracted {} listings from {}", listings.len(), path.display());
    println!("{}", serde_json::to_string_pretty(&listings)?);
    Ok(())
}

async fn manage_rules(store: &JsonFileRuleStore, command: RulesCommand, dry_run: bool) -> Result<()> {
    match command {
        RulesCommand::List => {
            let rules = store.list_rules().await?;
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
        RulesCommand::Put { file } => {
            let rule: RetrievalRule = read_json(&file)?;
            if dry_run {
                warn!(rule = %rule.name, "dry run, not saving");
            } else {
                store.put_rule(&rule).await?;
                info!(rule = %rule.name, "saved rule to {}", store.path().display());
            }
        }
        RulesCommand::Import { file } => {
            let rules: Vec<RetrievalRule> = read_json(&file)?;
            if dry_run {
                warn!(rules = rules.len(), "dry run, not saving");
            } else {
                put_rules_chunked(store, &rules).await?;
                info!("Imported {} rules into {}", rules.len(), store.path().display());
            }
        }
        RulesCommand::Delete { name } => {
            if dry_run {
                warn!(rule = %name, "dry run, not deleting");
            } else {
                store.delete_rule(&name).await?;
                info!(rule = %name, "deleted rule");
            }
        }
        RulesCommand::Reset { name } => {
            let mut rule = store
                .list_rules()
                .await?
                .into_iter()
                .find(|rule| rule.name == name)
                .with_context(|| format!("No rule named {name}"))?;
            rule.cutoffs.clear();
            if dry_run {
                warn!(rule = %name, "dry run, not clearing cutoffs");
            } else {
                store.put_rule(&rule).await?;
                info!(rule = %name, "cleared cutoffs");
            }
        }
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}
