use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scrapers::types::LayoutKind;

/// One row scraped from a listing board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub url: String,
    pub title: String,
    pub image_url: String,
    pub street: String,
    pub rooms: u32,
    pub area: f64,
    pub floor: u32,
    pub floor_count: u32,
    pub series: String,
    pub price: f64,
}

impl Listing {
    pub fn is_top_floor(&self) -> bool {
        self.floor == self.floor_count
    }
}

/// Inclusive numeric range where a missing bound means "unconstrained".
/// Zero is a real bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<T>,
}

impl<T> RangeFilter<T> {
    pub fn new(from: Option<T>, to: Option<T>) -> Self {
        Self { from, to }
    }
}

impl<T> Default for RangeFilter<T> {
    fn default() -> Self {
        Self { from: None, to: None }
    }
}

/// Compound predicate of a rule. Every configured constraint must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<RangeFilter<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rooms: Option<RangeFilter<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<RangeFilter<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<RangeFilter<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_not_top_floor: Option<bool>,
}

/// A named subscription: which page to watch, who to tell and what was
/// seen last time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRule {
    pub name: String,
    pub email: String,
    /// Page to scrape, absolute or relative to the configured site.
    pub url: String,
    /// Form parameters posted with the page request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub layout: LayoutKind,
    #[serde(default)]
    pub filters: Filters,
    /// Ids of the newest listings seen on the last successful run, newest first.
    #[serde(default)]
    pub cutoffs: Vec<String>,
}

impl RetrievalRule {
    pub fn new(name: impl Into<String>, email: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            url: url.into(),
            params: BTreeMap::new(),
            layout: LayoutKind::default(),
            filters: Filters::default(),
            cutoffs: Vec::new(),
        }
    }

    /// A rule that has never completed a run seeds its watermark silently.
    pub fn is_seeded(&self) -> bool {
        !self.cutoffs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_without_optional_fields_deserializes() {
        let raw = r#"{
            "name": "riga-2room",
            "email": "someone@example.com",
            "url": "/lv/real-estate/flats/riga/centre/sell/",
            "filters": { "price": { "from": 0, "to": 90000 }, "is_not_top_floor": true },
            "cutoffs": ["52852432"]
        }"#;
        let rule: RetrievalRule = serde_json::from_str(raw).unwrap();

        assert_eq!(rule.layout, LayoutKind::Subsection);
        assert!(rule.params.is_empty());
        let price = rule.filters.price.unwrap();
        assert_eq!(price.from, Some(0.0));
        assert_eq!(price.to, Some(90000.0));
        assert_eq!(rule.filters.rooms, None);
        assert_eq!(rule.filters.is_not_top_floor, Some(true));
        assert!(rule.is_seeded());
    }

    #[test]
    fn top_floor_is_derived() {
        let mut listing = Listing {
            id: "1".into(),
            url: String::new(),
            title: String::new(),
            image_url: String::new(),
            street: String::new(),
            rooms: 2,
            area: 50.0,
            floor: 5,
            floor_count: 5,
            series: String::new(),
            price: 1.0,
        };
        assert!(listing.is_top_floor());
        listing.floor = 4;
        assert!(!listing.is_top_floor());
    }
}
