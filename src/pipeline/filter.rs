use crate::dataset::Dataset;
use crate::error::Result;
use serde::Serialize;

/// Inclusive price bounds. An inverted range is legal and matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl PriceRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.min && price <= self.max
    }

    /// True when no price at all can fall inside the bounds.
    pub fn is_empty(&self) -> bool {
        !(self.min <= self.max)
    }
}

/// Parse a price cell. Blank or non-numeric cells have no price.
pub fn parse_price(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|p| !p.is_nan())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FilterStats {
    pub rows_in: usize,
    pub rows_kept: usize,
    /// Rows dropped because their price cell was blank or not a number
    pub unpriced: usize,
}

impl FilterStats {
    pub fn rows_dropped(&self) -> usize {
        self.rows_in - self.rows_kept
    }
}

/// Inclusion mask over the rows of `dataset`: `true` iff the price lies in `range`.
pub fn price_mask(dataset: &Dataset, price_column: usize, range: PriceRange) -> (Vec<bool>, usize) {
    let mut unpriced = 0;
    let mask = dataset
        .column(price_column)
        .map(|cell| match parse_price(cell) {
            Some(price) => range.contains(price),
            None => {
                unpriced += 1;
                false
            }
        })
        .collect();
    (mask, unpriced)
}

/// Drop every row whose price falls outside `range`, keeping row order.
pub fn filter_by_price(
    dataset: Dataset,
    price_column: usize,
    range: PriceRange,
) -> Result<(Dataset, FilterStats)> {
    let rows_in = dataset.len();
    let (mask, unpriced) = price_mask(&dataset, price_column, range);
    let filtered = dataset.filter_rows(&mask)?;
    let stats = FilterStats {
        rows_in,
        rows_kept: filtered.len(),
        unpriced,
    };
    Ok((filtered, stats))
}
