// Cleaning pipeline: price filter, review-date normalization and the step that
// ties them to the artifact store

pub mod cleaning;
pub mod filter;
pub mod normalize;

pub use cleaning::{CleaningStep, StepReport};
pub use filter::{filter_by_price, parse_price, price_mask, FilterStats, PriceRange};
pub use normalize::{normalize_dates, parse_review_date, NormalizeStats};
