use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Row containers carry ids like `tr_52852432`.
pub const ROW_ID_PREFIX: &str = "tr_";
/// Promotional rows reuse the row prefix, e.g. `tr_bnr_712`.
pub const BANNER_MARKER: &str = "bnr";

/// Which board layout a rule's page uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    /// Section pages, which have a model/series column
    #[default]
    Subsection,
    /// Top-level pages without the series column
    TopLevel,
}

/// How the text of a column turns into a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Trimmed text, must not be empty
    Text,
    /// Whole cell is a plain integer
    Integer,
    /// Leading numeric run, thousands separators and units dropped ("79,500  €")
    Amount,
    /// Exactly two integer runs ("4/5")
    FloorPair,
}

/// Position of a field among a row's child cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub index: usize,
    pub pattern: Pattern,
}

impl Column {
    pub const fn new(index: usize, pattern: Pattern) -> Self {
        Self { index, pattern }
    }
}

/// Field-to-column table for one board layout.
///
/// Columns are addressed positionally, so layout drift on the site is
/// absorbed here and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub title: Column,
    pub street: Column,
    pub rooms: Column,
    pub area: Column,
    pub floor: Column,
    pub series: Option<Column>,
    pub price: Column,
}

impl Layout {
    pub fn subsection() -> Self {
        Self {
            title: Column::new(2, Pattern::Text),
            street: Column::new(3, Pattern::Text),
            rooms: Column::new(4, Pattern::Integer),
            area: Column::new(5, Pattern::Amount),
            floor: Column::new(6, Pattern::FloorPair),
            series: Some(Column::new(7, Pattern::Text)),
            // column 8 is price per square meter
            price: Column::new(9, Pattern::Amount),
        }
    }

    pub fn top_level() -> Self {
        Self {
            series: None,
            price: Column::new(8, Pattern::Amount),
            ..Self::subsection()
        }
    }

    /// Field name, column pairs in row order
    pub fn columns(&self) -> Vec<(&'static str, Column)> {
        let mut columns = vec![
            ("title", self.title),
            ("street", self.street),
            ("rooms", self.rooms),
            ("area", self.area),
            ("floor", self.floor),
        ];
        if let Some(series) = self.series {
            columns.push(("series", series));
        }
        columns.push(("price", self.price));
        columns
    }
}

impl From<LayoutKind> for Layout {
    fn from(kind: LayoutKind) -> Self {
        match kind {
            LayoutKind::Subsection => Self::subsection(),
            LayoutKind::TopLevel => Self::top_level(),
        }
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::subsection()
    }
}

/// One page to download: the resolved url plus the form fields to post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageRequest {
    pub url: Url,
    pub params: BTreeMap<String, String>,
}

impl PageRequest {
    /// Resolve a rule url, which may be site-relative, against the site root.
    pub fn resolve(
        base: &Url,
        url: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: base.join(url)?,
            params: params.clone(),
        })
    }

    pub fn is_form(&self) -> bool {
        !self.params.is_empty()
    }
}
