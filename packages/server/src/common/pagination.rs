//! Page-limit handling shared by the paged read endpoints.
//!
//! Each view has its own default and maximum page size; anything beyond the
//! maximum clamps rather than erroring.

use serde::Deserialize;

/// Per-view page size bounds.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default: i64,
    pub max: i64,
}

pub const ITEM_PAGE: PageLimits = PageLimits {
    default: 100,
    max: 200,
};
pub const DECISION_PAGE: PageLimits = PageLimits {
    default: 500,
    max: 2000,
};
pub const EXPORT_PAGE: PageLimits = PageLimits {
    default: 50,
    max: 100,
};

impl PageLimits {
    /// Apply the default and clamp into `[1, max]`.
    pub fn clamp(&self, requested: Option<i64>) -> i64 {
        requested.unwrap_or(self.default).clamp(1, self.max)
    }
}

/// Query parameters accepted by every paged endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

/// Trim a `limit + 1` fetch down to the page and report whether more rows
/// remain. Queries over-fetch by one row so `next_cursor` is only issued
/// when a further page actually exists.
pub fn trim_page<T>(rows: Vec<T>, limit: i64) -> (Vec<T>, bool) {
    let has_more = rows.len() > limit as usize;
    let rows = if has_more {
        rows.into_iter().take(limit as usize).collect()
    } else {
        rows
    };
    (rows, has_more)
}
