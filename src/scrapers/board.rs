use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ExtractError, RowError};
use crate::models::Listing;
use crate::scrapers::types::{Column, Layout, Pattern, BANNER_MARKER, ROW_ID_PREFIX};

/// Turns a listing board page into listings, keeping the page order
/// (newest first).
pub struct BoardExtractor {
    layout: Layout,
    base: Url,
    rows: Selector,
    link: Selector,
    image: Selector,
    amount: Regex,
    integer: Regex,
}

impl BoardExtractor {
    /// `base` is the page url; relative links and images resolve against it.
    pub fn new(layout: Layout, base: Url) -> Result<Self, ExtractError> {
        validate(&layout)?;

        Ok(Self {
            layout,
            base,
            rows: selector(&format!(r#"[id^="{ROW_ID_PREFIX}"]"#))?,
            link: selector("[href]")?,
            image: selector("img")?,
            amount: Regex::new(r"\d[\d,]*(?:\.\d+)?")?,
            integer: Regex::new(r"\d+")?,
        })
    }

    /// Extract every well-formed row.
    ///
    /// Malformed rows are logged and skipped. Only a page without any row
    /// containers is an error.
    pub fn extract(&self, html: &str) -> Result<Vec<Listing>, ExtractError> {
        let document = Html::parse_document(html);

        let mut candidates = 0;
        let mut listings = Vec::new();

        for row in document.select(&self.rows) {
            candidates += 1;
            let marker = row.value().attr("id").unwrap_or_default();

            if marker.contains(BANNER_MARKER) {
                debug!(row = marker, "skipping banner row");
                continue;
            }

            match self.parse_row(row) {
                Ok(listing) => listings.push(listing),
                Err(e) => warn!(row = marker, error = %e, "skipping unparseable row"),
            }
        }

        if candidates == 0 {
            return Err(ExtractError::NoRows);
        }

        debug!(
            rows = candidates,
            listings = listings.len(),
            "extracted board page"
        );
        Ok(listings)
    }

    fn parse_row(&self, row: ElementRef) -> Result<Listing, RowError> {
        let id = row_id(row.value().attr("id"))?;
        let cells: Vec<ElementRef> = row.children().filter_map(ElementRef::wrap).collect();

        let href = first_attr(row, &self.link, "href").ok_or(RowError::MissingLink)?;
        let src = first_attr(row, &self.image, "src").ok_or(RowError::MissingImage)?;

        let title = text_at(&cells, "title", self.layout.title)?;
        let street = text_at(&cells, "street", self.layout.street)?;
        let rooms = self.whole_number_at(&cells, "rooms", self.layout.rooms)?;
        let area = self.number_at(&cells, "area", self.layout.area)?;
        let (floor, floor_count) = self.floor_at(&cells, self.layout.floor)?;
        let series = match self.layout.series {
            Some(column) => text_at(&cells, "series", column)?,
            None => String::new(),
        };
        let price = self.number_at(&cells, "price", self.layout.price)?;

        Ok(Listing {
            url: self.resolve(href)?,
            image_url: self.resolve(src)?,
            id,
            title,
            street,
            rooms,
            area,
            floor,
            floor_count,
            series,
            price,
        })
    }

    fn resolve(&self, link: &str) -> Result<String, RowError> {
        self.base
            .join(link)
            .map(String::from)
            .map_err(|e| RowError::BadUrl {
                url: link.to_string(),
                reason: e.to_string(),
            })
    }

    fn number_at(
        &self,
        cells: &[ElementRef],
        field: &'static str,
        column: Column,
    ) -> Result<f64, RowError> {
        let text = text_at(cells, field, column)?;
        let bad = || RowError::BadNumber {
            field,
            text: text.clone(),
        };

        let digits = match column.pattern {
            Pattern::Integer => text.clone(),
            _ => self
                .amount
                .find(&text)
                .map(|m| m.as_str().replace(',', ""))
                .ok_or_else(bad)?,
        };

        match column.pattern {
            Pattern::Integer => digits.parse::<u64>().map(|n| n as f64).map_err(|_| bad()),
            _ => digits.parse::<f64>().map_err(|_| bad()),
        }
    }

    fn whole_number_at(
        &self,
        cells: &[ElementRef],
        field: &'static str,
        column: Column,
    ) -> Result<u32, RowError> {
        let value = self.number_at(cells, field, column)?;
        if value.fract() != 0.0 || value > f64::from(u32::MAX) {
            return Err(RowError::BadNumber {
                field,
                text: value.to_string(),
            });
        }
        Ok(value as u32)
    }

    fn floor_at(&self, cells: &[ElementRef], column: Column) -> Result<(u32, u32), RowError> {
        let text = text_at(cells, "floor", column)?;
        let parts: Vec<u32> = self
            .integer
            .find_iter(&text)
            .map(|m| m.as_str().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| RowError::BadFloor(text.clone()))?;

        match parts[..] {
            [floor, floor_count] if floor >= 1 && floor <= floor_count => Ok((floor, floor_count)),
            _ => Err(RowError::BadFloor(text)),
        }
    }
}

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

/// Every column must carry a pattern its field can be read with.
fn validate(layout: &Layout) -> Result<(), ExtractError> {
    for (field, column) in layout.columns() {
        let ok = match field {
            "floor" => column.pattern == Pattern::FloorPair,
            "rooms" | "area" | "price" => {
                matches!(column.pattern, Pattern::Integer | Pattern::Amount)
            }
            _ => column.pattern == Pattern::Text,
        };
        if !ok {
            return Err(ExtractError::Layout {
                field,
                pattern: format!("{:?}", column.pattern),
            });
        }
    }
    Ok(())
}

fn row_id(marker: Option<&str>) -> Result<String, RowError> {
    let marker = marker
        .filter(|m| !m.is_empty())
        .ok_or(RowError::MissingId)?;

    match marker.strip_prefix(ROW_ID_PREFIX) {
        Some(id) if !id.is_empty() && !id.contains('_') => Ok(id.to_string()),
        _ => Err(RowError::BadId(marker.to_string())),
    }
}

fn first_attr<'a>(row: ElementRef<'a>, selector: &Selector, attr: &str) -> Option<&'a str> {
    row.select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .filter(|v| !v.is_empty())
}

fn text_at(cells: &[ElementRef], field: &'static str, column: Column) -> Result<String, RowError> {
    let cell = cells.get(column.index).ok_or(RowError::MissingColumn {
        field,
        index: column.index,
    })?;

    let text = cell.text().collect::<String>().trim().to_string();
    if text.is_empty() {
        return Err(RowError::EmptyText {
            field,
            index: column.index,
        });
    }
    Ok(text)
}
