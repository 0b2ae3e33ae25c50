//! Novelty tracking against the persisted watermark.
//!
//! Boards list newest first. A rule remembers the ids of the first few
//! listings it saw; on the next run everything above the first remembered
//! id still on the page is new.

use std::collections::HashSet;

use crate::models::Listing;

/// How many leading ids make up a watermark.
pub const CUTOFF_LEN: usize = 3;

/// Leading run of `listings` that appeared since the watermark was taken.
///
/// The boundary is the smallest index holding any watermark id. Watermark
/// ids need not be contiguous on the current page (new rows may have been
/// inserted between them) and some may have rotated off entirely. When none
/// is found, or the watermark is empty, everything is new.
pub fn split_new<'a>(listings: &'a [Listing], cutoffs: &[String]) -> &'a [Listing] {
    let mut remaining: HashSet<&str> = cutoffs.iter().map(String::as_str).collect();
    let mut boundary = listings.len();

    for (index, listing) in listings.iter().enumerate() {
        if remaining.is_empty() {
            break;
        }
        if remaining.remove(listing.id.as_str()) {
            boundary = boundary.min(index);
        }
    }

    &listings[..boundary]
}

/// Watermark to persist for the next run: ids of the first
/// [`CUTOFF_LEN`] listings, page order kept.
pub fn compute_cutoffs(listings: &[Listing]) -> Vec<String> {
    listings
        .iter()
        .take(CUTOFF_LEN)
        .map(|listing| listing.id.clone())
        .collect()
}
