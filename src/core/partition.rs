//! Purpose: Page/row arithmetic for splitting a collection into fixed-size partitions.
//! Exports: `Partitions`.
//! Invariants: Partition `i` is page `i + 1`; divisions start at 0 and end at the item count.
use std::ops::Range;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Partitions {
    items_per_page: u64,
    nitems: u64,
}

impl Partitions {
    pub fn new(items_per_page: u64, nitems: u64) -> Result<Self, Error> {
        if items_per_page == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("items per page must be at least 1"));
        }
        Ok(Self {
            items_per_page,
            nitems,
        })
    }

    pub fn items_per_page(&self) -> u64 {
        self.items_per_page
    }

    pub fn nitems(&self) -> u64 {
        self.nitems
    }

    pub fn len(&self) -> u64 {
        self.nitems.div_ceil(self.items_per_page)
    }

    pub fn is_empty(&self) -> bool {
        self.nitems == 0
    }

    /// Page numbers to fetch, one per partition.
    pub fn pages(&self) -> impl Iterator<Item = u64> + use<> {
        1..=self.len()
    }

    /// Row offsets where each partition starts, followed by the total row count.
    pub fn divisions(&self) -> Vec<u64> {
        (0..self.len())
            .map(|idx| idx * self.items_per_page)
            .chain(std::iter::once(self.nitems))
            .collect()
    }

    pub fn rows(&self, partition: u64) -> Option<Range<u64>> {
        if partition >= self.len() {
            return None;
        }
        let start = partition * self.items_per_page;
        Some(start..(start + self.items_per_page).min(self.nitems))
    }

    pub fn page_for_row(&self, row: u64) -> Option<u64> {
        (row < self.nitems).then(|| row / self.items_per_page + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::Partitions;
    use proptest::prelude::*;

    #[test]
    fn huge_totals_stay_lazy() {
        let partitions = Partitions::new(1, u64::MAX).expect("partitions");
        assert_eq!(partitions.len(), u64::MAX);
        assert_eq!(partitions.pages().take(2).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn divisions_for_partial_last_page() {
        let partitions = Partitions::new(100, 250).expect("partitions");
        assert_eq!(partitions.pages().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(partitions.divisions(), vec![0, 100, 200, 250]);
        assert_eq!(partitions.rows(2), Some(200..250));
        assert_eq!(partitions.rows(3), None);
        assert_eq!(partitions.page_for_row(199), Some(2));
    }

    #[test]
    fn empty_collection_has_single_division() {
        let partitions = Partitions::new(25, 0).expect("partitions");
        assert!(partitions.is_empty());
        assert_eq!(partitions.pages().next(), None);
        assert_eq!(partitions.divisions(), vec![0]);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        assert!(Partitions::new(0, 10).is_err());
    }

    proptest! {
        #[test]
        fn divisions_cover_every_row(per_page in 1u64..500, nitems in 0u64..10_000) {
            let partitions = Partitions::new(per_page, nitems).expect("partitions");
            let divisions = partitions.divisions();
            prop_assert_eq!(divisions.len() as u64, partitions.len() + 1);
            prop_assert_eq!(divisions.first().copied(), Some(0));
            prop_assert_eq!(divisions.last().copied(), Some(nitems));
            prop_assert!(divisions.windows(2).all(|pair| pair[0] <= pair[1]));
            let covered: u64 = (0..partitions.len())
                .filter_map(|idx| partitions.rows(idx))
                .map(|range| range.end - range.start)
                .sum();
            prop_assert_eq!(covered, nitems);
        }
    }
}
