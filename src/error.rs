//! Typed errors for extraction and storage.

use thiserror::Error;

/// Why a single board row was dropped.
#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("row has no id attribute")]
    MissingId,

    #[error("unexpected row id format: {0}")]
    BadId(String),

    #[error("no column {index} for {field}")]
    MissingColumn { field: &'static str, index: usize },

    #[error("empty text in column {index} for {field}")]
    EmptyText { field: &'static str, index: usize },

    #[error("unexpected {field} format: {text:?}")]
    BadNumber { field: &'static str, text: String },

    #[error("unexpected floor format: {0:?}")]
    BadFloor(String),

    #[error("no link found")]
    MissingLink,

    #[error("no image found")]
    MissingImage,

    #[error("invalid url {url:?}: {reason}")]
    BadUrl { url: String, reason: String },
}

/// Failure of a whole page.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no listing rows found")]
    NoRows,

    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error(transparent)]
    Pattern(#[from] regex::Error),

    #[error("layout column for {field} cannot use {pattern}")]
    Layout { field: &'static str, pattern: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot write {len} rules in a single batch (max {max})")]
    BatchTooLarge { len: usize, max: usize },

    #[error("rule not found: {0}")]
    NotFound(String),
}
