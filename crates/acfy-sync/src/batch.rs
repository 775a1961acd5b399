//! Fixed-size batching of ordered sequences.

use std::num::NonZeroUsize;

/// Lazy iterator over consecutive groups of at most `size` items.
#[derive(Debug, Clone)]
pub struct Chunks<I> {
    inner: I,
    size: usize,
}

impl<I: Iterator> Iterator for Chunks<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<_> = self.inner.by_ref().take(self.size).collect();
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

/// Splits `items` into groups of `size`; only the last group may be shorter.
pub fn chunk<I: IntoIterator>(items: I, size: NonZeroUsize) -> Chunks<I::IntoIter> {
    Chunks {
        inner: items.into_iter(),
        size: size.get(),
    }
}
