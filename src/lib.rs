//! Watches classified-listing boards and reports listings that are new
//! since the previous run and match a rule's filters.

pub mod config;
pub mod error;
pub mod filter;
pub mod models;
pub mod notify;
pub mod reporter;
pub mod scrapers;
pub mod store;

pub use config::Config;
pub use models::{Filters, Listing, RangeFilter, RetrievalRule};
pub use reporter::{Reporter, RuleOutcome, RuleStatus, RunReport, Stage};
