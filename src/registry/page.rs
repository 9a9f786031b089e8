//! Page slicing over the filtered-and-sorted view.

use crate::types::ConnectionRecord;
use serde::Serialize;

/// Default number of rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Maximum number of page links shown in a navigation bar.
pub const PAGE_WINDOW: usize = 5;

/// One rendered page of the current view.
///
/// `start` and `end` are the 1-based displayed range ("Showing 21-40 of 57");
/// both are 0 when the page is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub records: Vec<ConnectionRecord>,
    pub total: usize,
    pub start: usize,
    pub end: usize,
    pub number: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_next(&self) -> bool {
        self.number < self.total_pages
    }
}

/// Number of pages needed to show `total` rows.
pub fn total_pages(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        0
    } else {
        total.div_ceil(page_size)
    }
}

/// Slices `view` into page `number` (1-based). Out-of-range pages, page 0 and
/// a zero page size all yield an empty slice with the correct total.
pub fn paginate(view: &[ConnectionRecord], number: usize, page_size: usize) -> Page {
    let total = view.len();
    let pages = total_pages(total, page_size);

    let (lo, hi) = if number == 0 || page_size == 0 {
        (0, 0)
    } else {
        let lo = (number - 1).saturating_mul(page_size).min(total);
        let hi = number.saturating_mul(page_size).min(total);
        (lo, hi)
    };

    let records = view[lo..hi].to_vec();
    let (start, end) = if records.is_empty() { (0, 0) } else { (lo + 1, hi) };

    Page {
        records,
        total,
        start,
        end,
        number,
        page_size,
        total_pages: pages,
    }
}

/// Page numbers to show around `current`, at most `width` of them.
///
/// The window is centred where possible and slides left near the last page.
pub fn page_window(current: usize, total_pages: usize, width: usize) -> Vec<usize> {
    if total_pages == 0 || width == 0 {
        return Vec::new();
    }

    let half = width / 2;
    let mut first = current.saturating_sub(half).max(1);
    let last = (first + width - 1).min(total_pages);
    if last + 1 - first < width {
        first = (last + 1).saturating_sub(width).max(1);
    }

    (first..=last).collect()
}
