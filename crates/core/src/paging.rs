//! Paging math and the paged result value.

use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, RepositoryResult};

/// Validated page coordinates (1-based page number).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    page_size: u64,
    page_number: u64,
}

impl PageRequest {
    /// Both values must be at least 1.
    pub fn new(page_size: u64, page_number: u64) -> RepositoryResult<Self> {
        if page_number < 1 {
            return Err(RepositoryError::invalid_argument(
                "page number should be a positive number",
            ));
        }
        if page_size < 1 {
            return Err(RepositoryError::invalid_argument(
                "page size should be a positive number",
            ));
        }
        Ok(Self {
            page_size,
            page_number,
        })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn page_number(&self) -> u64 {
        self.page_number
    }

    /// Rows preceding this page.
    pub fn skip(&self) -> u64 {
        self.page_size.saturating_mul(self.page_number - 1)
    }
}

/// One page of results plus paging metadata.
///
/// Computed fresh per query and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    total_records: u64,
    total_pages: u64,
    current_page: u64,
    page_size: u64,
    has_next_page: bool,
    has_previous_page: bool,
    items: Vec<T>,
}

impl<T> PagedResult<T> {
    pub fn new(request: PageRequest, total_records: u64, items: Vec<T>) -> Self {
        let total_pages = total_records.div_ceil(request.page_size);
        let current_page = request.page_number;

        Self {
            total_records,
            total_pages,
            current_page,
            page_size: request.page_size,
            has_next_page: total_pages > current_page,
            has_previous_page: current_page > 1 && total_pages > 1,
            items,
        }
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    pub fn current_page(&self) -> u64 {
        self.current_page
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    pub fn has_previous_page(&self) -> bool {
        self.has_previous_page
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Transform the items, keeping the metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            total_records: self.total_records,
            total_pages: self.total_pages,
            current_page: self.current_page,
            page_size: self.page_size,
            has_next_page: self.has_next_page,
            has_previous_page: self.has_previous_page,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn page(total: u64, size: u64, number: u64) -> PagedResult<()> {
        PagedResult::new(PageRequest::new(size, number).unwrap(), total, vec![])
    }

    #[test]
    fn rejects_non_positive_coordinates() {
        assert!(matches!(PageRequest::new(0, 1), Err(RepositoryError::InvalidArgument(_))));
        assert!(matches!(PageRequest::new(10, 0), Err(RepositoryError::InvalidArgument(_))));
    }

    #[test]
    fn skip_is_size_times_preceding_pages() {
        assert_eq!(PageRequest::new(10, 1).unwrap().skip(), 0);
        assert_eq!(PageRequest::new(10, 3).unwrap().skip(), 20);
    }

    #[test]
    fn twenty_five_records_in_pages_of_ten() {
        let first = page(25, 10, 1);
        assert_eq!(first.total_pages(), 3);
        assert!(!first.has_previous_page());
        assert!(first.has_next_page());

        let last = page(25, 10, 3);
        assert!(last.has_previous_page());
        assert!(!last.has_next_page());
    }

    #[test]
    fn single_page_has_no_neighbours() {
        let only = page(4, 10, 1);
        assert_eq!(only.total_pages(), 1);
        assert!(!only.has_next_page());
        assert!(!only.has_previous_page());
    }

    #[test]
    fn empty_view_has_zero_pages() {
        let empty = page(0, 10, 1);
        assert_eq!(empty.total_pages(), 0);
        assert!(!empty.has_next_page());
        assert!(!empty.has_previous_page());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: total pages is the smallest page count that covers every record.
        #[test]
        fn total_pages_covers_all_records(total in 0u64..100_000, size in 1u64..500) {
            let result = page(total, size, 1);
            prop_assert!(result.total_pages() * size >= total);
            if result.total_pages() > 0 {
                prop_assert!((result.total_pages() - 1) * size < total);
            }
        }

        /// Property: a next page exists exactly when later pages hold records.
        #[test]
        fn next_page_iff_records_remain(total in 0u64..10_000, size in 1u64..100, number in 1u64..200) {
            let result = page(total, size, number);
            prop_assert_eq!(result.has_next_page(), size * number < total);
            prop_assert_eq!(result.has_previous_page(), number > 1 && total > size);
        }
    }
}
