use crate::locator::Locator;
use std::cmp::Ordering;

/// Ordered sequence of page-boundary locators, one per page. Strictly
/// increasing under the active comparison function. Rebuilt wholesale on
/// document open, viewport resize, or layout-mode change; never patched.
#[derive(Debug, Clone, Default)]
pub struct PageIndex {
    boundaries: Vec<Locator>,
}

impl PageIndex {
    pub fn new() -> Self {
        Self {
            boundaries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// Total number of pages in the index.
    pub fn total(&self) -> usize {
        self.boundaries.len()
    }

    /// Append a page boundary, dropping it if it equals the previous one.
    /// Probing can report the same start locator twice when an advance
    /// lands on the page it started from.
    pub fn push_boundary(
        &mut self,
        locator: Locator,
        cmp: impl Fn(&Locator, &Locator) -> Ordering,
    ) {
        if let Some(last) = self.boundaries.last() {
            if cmp(last, &locator) == Ordering::Equal {
                return;
            }
        }
        self.boundaries.push(locator);
    }

    /// Predecessor search: 1-based page number of the rightmost boundary
    /// `<=` the queried locator. Positions before the first boundary map
    /// to page 1.
    pub fn page_of(
        &self,
        locator: &Locator,
        cmp: impl Fn(&Locator, &Locator) -> Ordering,
    ) -> usize {
        if self.boundaries.is_empty() {
            return 1;
        }
        let mut lo = 0usize;
        let mut hi = self.boundaries.len() - 1;
        let mut ans = 0usize;
        while lo <= hi {
            let mid = (lo + hi) / 2;
            if cmp(&self.boundaries[mid], locator) != Ordering::Greater {
                ans = mid;
                lo = mid + 1;
            } else {
                if mid == 0 {
                    break;
                }
                hi = mid - 1;
            }
        }
        ans + 1
    }

    /// Locator that starts the given 1-based page, if in range.
    pub fn locator_for_page(&self, page: usize) -> Option<&Locator> {
        if page == 0 {
            return None;
        }
        self.boundaries.get(page - 1)
    }

    /// Whether the sequence is strictly increasing under `cmp`. Build code
    /// asserts this after every rebuild.
    pub fn is_strictly_increasing(
        &self,
        cmp: impl Fn(&Locator, &Locator) -> Ordering,
    ) -> bool {
        self.boundaries
            .windows(2)
            .all(|w| cmp(&w[0], &w[1]) == Ordering::Less)
    }
}
