//! Column permutation bookkeeping for the elimination routines

use std::ops::Range;

/// Tracked column order of a matrix undergoing elimination
///
/// Slot `i` holds the original index of the column currently stored at
/// position `i`. Swapping two matrix columns and calling [`Permutation::swap`]
/// with the same indices keeps the mapping consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    order: Vec<usize>,
}

impl Permutation {
    /// Identity permutation over `n` slots
    pub fn identity(n: usize) -> Permutation {
        Permutation {
            order: (0..n).collect(),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Original column index of the column currently at `slot`
    pub fn slot(&self, slot: usize) -> usize {
        self.order[slot]
    }

    /// View of the full slot-to-original mapping
    pub fn as_slice(&self) -> &[usize] {
        &self.order
    }

    /// Record a column swap
    pub fn swap(&mut self, i: usize, j: usize) {
        self.order.swap(i, j);
    }

    /// Position each original column ends up in, i.e. the inverse mapping
    pub fn inverse(&self) -> Vec<usize> {
        let mut inverse = vec![0usize; self.order.len()];
        for (slot, &original) in self.order.iter().enumerate() {
            inverse[original] = slot;
        }
        inverse
    }

    /// Sort a slot range so its original indices appear in ascending order
    pub fn sort_range(&mut self, range: Range<usize>) {
        self.order[range].sort_unstable();
    }

    /// For each slot in `range`, the position it would take if the range were
    /// sorted ascending by original index
    pub fn ranking(&self, range: Range<usize>) -> Vec<usize> {
        let values = &self.order[range];
        let mut argsort: Vec<usize> = (0..values.len()).collect();
        argsort.sort_unstable_by_key(|&i| values[i]);
        let mut ranking = vec![0usize; values.len()];
        for (position, &index) in argsort.iter().enumerate() {
            ranking[index] = position;
        }
        ranking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_and_inverse() {
        let mut perm = Permutation::identity(4);
        perm.swap(0, 2);
        perm.swap(1, 3);
        assert_eq!(perm.as_slice(), &[2, 3, 0, 1]);
        let inverse = perm.inverse();
        for original in 0..4 {
            assert_eq!(perm.slot(inverse[original]), original);
        }
    }

    #[test]
    fn test_ranking_orders_by_original_index() {
        let mut perm = Permutation::identity(8);
        // bring originals [5, 2, 7] into slots 3..6
        perm.swap(3, 5);
        perm.swap(4, 2);
        perm.swap(5, 7);
        assert_eq!(&perm.as_slice()[3..6], &[5, 2, 7]);
        assert_eq!(perm.ranking(3..6), vec![1, 0, 2]);
    }

    #[test]
    fn test_sort_range_leaves_rest_untouched() {
        let mut perm = Permutation::identity(5);
        perm.swap(0, 4);
        perm.swap(1, 3);
        assert_eq!(perm.as_slice(), &[4, 3, 2, 1, 0]);
        perm.sort_range(2..5);
        assert_eq!(perm.as_slice(), &[4, 3, 0, 1, 2]);
    }
}
