//! Filter pipeline shared by every source adapter, plus keyword and price helpers.

use crate::model::{normalize_terms, price_bound, CandidateItem, FilterSpec};

/// Keyword used whenever the caller supplies an empty one.
pub const DEFAULT_KEYWORD: &str = "deals";

/// Trimmed keyword, or [`DEFAULT_KEYWORD`] when nothing is left.
pub fn normalize_keyword(keyword: &str) -> String {
    let trimmed = keyword.trim();
    if trimmed.is_empty() {
        DEFAULT_KEYWORD.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Rounded discount percentage; 0 when either price is missing or invalid.
pub fn calculate_discount(original_price: f64, current_price: f64) -> u8 {
    if !(original_price > 0.0) || !(current_price > 0.0) {
        return 0;
    }
    let pct = ((original_price - current_price) / original_price * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Apply discount, price, category, include/exclude keyword and stock filters,
/// then cap the result at `max_results` when one is set.
pub fn apply_filters(items: Vec<CandidateItem>, filters: &FilterSpec) -> Vec<CandidateItem> {
    // same term normalization as the cache fingerprint
    let categories = normalize_terms(&filters.categories);
    let include = normalize_terms(&filters.include_keywords);
    let exclude = normalize_terms(&filters.exclude_keywords);
    let min_price = price_bound(filters.min_price);
    let max_price = price_bound(filters.max_price);
    let in_stock_only = filters.in_stock_only.unwrap_or(true);

    let mut out: Vec<CandidateItem> = items
        .into_iter()
        .filter(|p| match filters.min_discount {
            Some(min) if min > 0 => p.discount_percent >= min,
            _ => true,
        })
        .filter(|p| min_price.map_or(true, |min| p.current_price >= min))
        .filter(|p| max_price.map_or(true, |max| p.current_price <= max))
        .filter(|p| {
            if categories.is_empty() {
                return true;
            }
            let cat = p.category.to_lowercase();
            categories.iter().any(|c| cat.contains(c.as_str()))
        })
        .filter(|p| {
            if include.is_empty() && exclude.is_empty() {
                return true;
            }
            let text = p.search_text();
            include.iter().all(|k| text.contains(k.as_str()))
                && !exclude.iter().any(|k| text.contains(k.as_str()))
        })
        .filter(|p| !in_stock_only || p.in_stock)
        .collect();

    if let Some(max) = filters.max_results {
        if max > 0 {
            out.truncate(max);
        }
    }
    out
}
