use crate::models::{Filters, Listing, RangeFilter};

/// Keep the listings that satisfy every configured constraint of `filters`.
pub fn apply(listings: &[Listing], filters: &Filters) -> Vec<Listing> {
    listings
        .iter()
        .filter(|listing| matches(listing, filters))
        .cloned()
        .collect()
}

/// Whether one listing passes. Unset constraints pass vacuously.
pub fn matches(listing: &Listing, filters: &Filters) -> bool {
    in_range(listing.price, filters.price.as_ref())
        && in_range(listing.rooms, filters.rooms.as_ref())
        && in_range(listing.area, filters.area.as_ref())
        && in_range(listing.floor, filters.floor.as_ref())
        && equals(!listing.is_top_floor(), filters.is_not_top_floor)
}

/// Both bounds are inclusive; a missing bound does not constrain.
fn in_range<T: PartialOrd>(value: T, range: Option<&RangeFilter<T>>) -> bool {
    let Some(range) = range else {
        return true;
    };
    if range.from.as_ref().is_some_and(|from| value < *from) {
        return false;
    }
    if range.to.as_ref().is_some_and(|to| value > *to) {
        return false;
    }
    true
}

fn equals(value: bool, wanted: Option<bool>) -> bool {
    wanted.map_or(true, |wanted| value == wanted)
}
