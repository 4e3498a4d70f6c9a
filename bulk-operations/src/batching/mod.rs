//! Batch splitting.
//!
//! Partitions an item list into ordered, fixed-size batches. Every batch has
//! exactly `batch_size` items except possibly the last one, and concatenating
//! the batches reproduces the input.

use std::num::NonZeroUsize;

use crate::errors::BulkError;

/// Split `items` into `ceil(len / batch_size)` ordered batches.
///
/// An empty input yields no batches.
pub fn create_batches<T>(items: Vec<T>, batch_size: NonZeroUsize) -> Vec<Vec<T>> {
    let size = batch_size.get();
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut items = items.into_iter().peekable();

    while items.peek().is_some() {
        batches.push(items.by_ref().take(size).collect());
    }
    batches
}

/// Convert a configured batch size, rejecting zero.
pub fn batch_size_from(size: usize) -> Result<NonZeroUsize, BulkError> {
    NonZeroUsize::new(size)
        .ok_or_else(|| BulkError::invalid_argument("batch size must be greater than zero"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_batch_count_is_ceiling() {
        for (len, batch, expected) in [(0, 3, 0), (1, 3, 1), (3, 3, 1), (7, 3, 3), (1000, 500, 2)] {
            let batches = create_batches((0..len).collect::<Vec<_>>(), size(batch));
            assert_eq!(batches.len(), expected, "len={} batch={}", len, batch);
        }
    }

    #[test]
    fn test_batches_preserve_order_and_sizes() {
        let items: Vec<u32> = (0..11).collect();
        let batches = create_batches(items.clone(), size(4));

        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![4, 4, 3]
        );
        assert_eq!(batches.concat(), items);
    }

    #[test]
    fn test_oversized_batch_yields_single_batch() {
        let batches = create_batches(vec!["a", "b"], size(500));
        assert_eq!(batches, vec![vec!["a", "b"]]);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(matches!(
            batch_size_from(0),
            Err(BulkError::InvalidArgument(_))
        ));
        assert_eq!(batch_size_from(500).unwrap().get(), 500);
    }
}
