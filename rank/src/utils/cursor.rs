/*
 * SPDX-FileCopyrightText: 2026 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Shared cursors distributing the elements of a collection among threads.
//!
//! All cursors follow the same protocol: a set of threads (usually, all the
//! threads of a pool running a [`broadcast`](rayon::ThreadPool::broadcast))
//! repeatedly claim a _batch_ of at most `batch_size` consecutive elements,
//! process it without holding any lock, and exit when they claim an empty
//! batch. Every element is claimed exactly once.
//!
//! Larger batches reduce the synchronization overhead; smaller batches reduce
//! the load imbalance at the end of the visit. There is no work stealing: a
//! thread that finds the collection exhausted simply exits.
//!
//! - [`IndexCursor`] distributes ranges of indices using a single atomic
//!   fetch-and-add; it is the cursor of choice for read-only visits of
//!   random-access data.
//! - [`SplitCursor`] guards with a lock the unclaimed suffix of a
//!   [splittable](Split) collection, and hands out its head; since batches
//!   are disjoint, it can hand out mutable slices.
//! - [`IterCursor`] guards with a lock an iterator; it is the fallback for
//!   sources that are not random-access.

use std::iter::Fuse;
use std::ops::Range;
use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

/// A lock-free cursor over a range of indices.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use webrank::utils::IndexCursor;
///
/// let cursor = IndexCursor::new(0..100, 8);
/// let sum = AtomicUsize::new(0);
/// webrank::thread_pool![4].broadcast(|_| {
///     for batch in cursor.batches() {
///         sum.fetch_add(batch.sum::<usize>(), Ordering::Relaxed);
///     }
/// });
/// assert_eq!(sum.into_inner(), 4950);
/// ```
#[derive(Debug)]
pub struct IndexCursor {
    next: AtomicUsize,
    end: usize,
    batch_size: usize,
}

impl IndexCursor {
    /// Creates a cursor over `range` claiming `batch_size` indices at a time.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn new(range: Range<usize>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "The batch size must be positive");
        Self {
            batch_size: batch_size.min(Split::len(&range).max(1)),
            next: AtomicUsize::new(range.start),
            end: range.end,
        }
    }

    /// Claims the next batch, or returns `None` if all indices have been
    /// claimed.
    #[inline]
    pub fn next_batch(&self) -> Option<Range<usize>> {
        // The index never moves past the end, so it cannot wrap around
        let start = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                (next < self.end).then(|| next.saturating_add(self.batch_size).min(self.end))
            })
            .ok()?;
        Some(start..self.end.min(start.saturating_add(self.batch_size)))
    }

    /// Returns an iterator claiming batches until the cursor is exhausted.
    pub fn batches(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        std::iter::from_fn(|| self.next_batch())
    }
}

/// Collections that can be split in two at a given position.
///
/// Pairs of splittable collections are splittable: in this case, the two
/// components must have the same length, and are split together.
pub trait Split: Sized {
    /// Returns the number of elements of the collection.
    fn len(&self) -> usize;

    /// Returns whether the collection is empty.
    fn is_empty(&self) -> bool {
        Split::len(self) == 0
    }

    /// Splits the collection into the first `mid` elements and the rest.
    fn split_at(self, mid: usize) -> (Self, Self);
}

impl<T> Split for &[T] {
    #[inline(always)]
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    #[inline(always)]
    fn split_at(self, mid: usize) -> (Self, Self) {
        <[T]>::split_at(self, mid)
    }
}

impl<T> Split for &mut [T] {
    #[inline(always)]
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    #[inline(always)]
    fn split_at(self, mid: usize) -> (Self, Self) {
        <[T]>::split_at_mut(self, mid)
    }
}

impl Split for Range<usize> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[inline(always)]
    fn split_at(self, mid: usize) -> (Self, Self) {
        let mid = self.start + mid;
        (self.start..mid, mid..self.end)
    }
}

impl<A: Split, B: Split> Split for (A, B) {
    #[inline(always)]
    fn len(&self) -> usize {
        debug_assert_eq!(Split::len(&self.0), Split::len(&self.1));
        Split::len(&self.0)
    }

    #[inline(always)]
    fn split_at(self, mid: usize) -> (Self, Self) {
        let (a0, a1) = self.0.split_at(mid);
        let (b0, b1) = self.1.split_at(mid);
        ((a0, b0), (a1, b1))
    }
}

/// A cursor handing out disjoint batches of a [splittable](Split) collection.
///
/// The unclaimed part of the collection is kept under a lock, which is held
/// only for the time needed to split it. Since claimed batches are disjoint,
/// the cursor can distribute mutable slices among threads.
///
/// # Examples
///
/// ```
/// use webrank::utils::SplitCursor;
///
/// let mut values = vec![0_usize; 100];
/// let cursor = SplitCursor::new((0..values.len(), values.as_mut_slice()), 8);
/// webrank::thread_pool![4].broadcast(|_| {
///     while let Some((indices, batch)) = cursor.next_batch() {
///         for (i, v) in indices.zip(batch) {
///             *v = i * i;
///         }
///     }
/// });
/// drop(cursor);
/// assert_eq!(values[9], 81);
/// ```
#[derive(Debug)]
pub struct SplitCursor<S> {
    rest: Mutex<Option<S>>,
    batch_size: usize,
}

impl<S: Split> SplitCursor<S> {
    /// Creates a cursor over `collection` claiming `batch_size` elements at a
    /// time.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn new(collection: S, batch_size: usize) -> Self {
        assert!(batch_size > 0, "The batch size must be positive");
        Self {
            rest: Mutex::new(Some(collection)),
            batch_size,
        }
    }

    /// Claims the next batch, or returns `None` if the collection has been
    /// exhausted.
    pub fn next_batch(&self) -> Option<S> {
        let mut rest = self.rest.lock().unwrap_or_else(PoisonError::into_inner);
        let collection = rest.take()?;
        if Split::is_empty(&collection) {
            return None;
        }
        let mid = self.batch_size.min(Split::len(&collection));
        let (batch, tail) = collection.split_at(mid);
        *rest = Some(tail);
        Some(batch)
    }
}

/// A cursor handing out batches of items of an iterator.
///
/// The iterator is kept under a lock, which is held while the items of a
/// batch are moved into a caller-provided buffer.
#[derive(Debug)]
pub struct IterCursor<I: Iterator> {
    iter: Mutex<Fuse<I>>,
    batch_size: usize,
}

impl<I: Iterator> IterCursor<I> {
    /// Creates a cursor over `iter` claiming `batch_size` items at a time.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn new(iter: impl IntoIterator<IntoIter = I>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "The batch size must be positive");
        Self {
            iter: Mutex::new(iter.into_iter().fuse()),
            batch_size,
        }
    }

    /// Claims the next batch, replacing the content of `batch` with it.
    ///
    /// Returns `false` if the iterator has been exhausted, in which case
    /// `batch` is left empty.
    pub fn next_batch(&self, batch: &mut Vec<I::Item>) -> bool {
        batch.clear();
        let mut iter = self.iter.lock().unwrap_or_else(PoisonError::into_inner);
        batch.extend(iter.by_ref().take(self.batch_size));
        !batch.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const N: usize = 37;

    fn assert_visited_once(counts: &[AtomicUsize], batch_size: usize) {
        for (i, c) in counts.iter().enumerate() {
            assert_eq!(
                c.load(Ordering::Relaxed),
                1,
                "element {i} with batch size {batch_size}"
            );
        }
    }

    #[test]
    fn test_index_cursor_visits_once() {
        let pool = crate::thread_pool![4];
        for batch_size in 1..=N {
            let counts: Vec<AtomicUsize> = (0..N).map(|_| AtomicUsize::new(0)).collect();
            let cursor = IndexCursor::new(0..N, batch_size);
            pool.broadcast(|_| {
                for batch in cursor.batches() {
                    assert!(Split::len(&batch) <= batch_size);
                    for i in batch {
                        counts[i].fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
            assert_visited_once(&counts, batch_size);
            // Exhausted cursors stay exhausted
            assert!(cursor.next_batch().is_none());
        }
    }

    #[test]
    fn test_index_cursor_offset_range() {
        let cursor = IndexCursor::new(10..15, 2);
        let batches: Vec<_> = cursor.batches().collect();
        assert_eq!(batches, vec![10..12, 12..14, 14..15]);
    }

    #[test]
    fn test_index_cursor_huge_batch_size() {
        let cursor = IndexCursor::new(0..10, usize::MAX / 2 + 2);
        let claims: Vec<_> = (0..4).map(|_| cursor.next_batch()).collect();
        assert_eq!(claims, vec![Some(0..10), None, None, None]);

        let cursor = IndexCursor::new(usize::MAX - 5..usize::MAX, usize::MAX);
        assert_eq!(cursor.next_batch(), Some(usize::MAX - 5..usize::MAX));
        assert_eq!(cursor.next_batch(), None);
        assert_eq!(cursor.next_batch(), None);

        let cursor = IndexCursor::new(0..0, usize::MAX);
        assert_eq!(cursor.next_batch(), None);
    }

    #[test]
    fn test_split_cursor_visits_once() {
        let pool = crate::thread_pool![4];
        for batch_size in 1..=N {
            let mut counts = vec![0_usize; N];
            let cursor = SplitCursor::new(counts.as_mut_slice(), batch_size);
            pool.broadcast(|_| {
                while let Some(batch) = cursor.next_batch() {
                    assert!(!batch.is_empty() && batch.len() <= batch_size);
                    for c in batch {
                        *c += 1;
                    }
                }
            });
            drop(cursor);
            assert!(counts.iter().all(|&c| c == 1), "batch size {batch_size}");
        }
    }

    #[test]
    fn test_split_cursor_pairs() {
        let mut values = vec![0.0; N];
        let cursor = SplitCursor::new((0..N, values.as_mut_slice()), 5);
        let mut seen = vec![];
        while let Some((indices, batch)) = cursor.next_batch() {
            assert_eq!(Split::len(&indices), batch.len());
            for (i, v) in indices.zip(batch) {
                *v = i as f64;
                seen.push(i);
            }
        }
        drop(cursor);
        assert_eq!(seen, (0..N).collect::<Vec<_>>());
        assert!(values.iter().enumerate().all(|(i, &v)| v == i as f64));
    }

    #[test]
    fn test_iter_cursor_visits_once() {
        let pool = crate::thread_pool![4];
        for batch_size in 1..=N {
            let counts: Vec<AtomicUsize> = (0..N).map(|_| AtomicUsize::new(0)).collect();
            let cursor = IterCursor::new(counts.iter(), batch_size);
            pool.broadcast(|_| {
                let mut batch = Vec::with_capacity(batch_size);
                while cursor.next_batch(&mut batch) {
                    assert!(batch.len() <= batch_size);
                    for c in batch.drain(..) {
                        c.fetch_add(1, Ordering::Relaxed);
                    }
                }
                assert!(batch.is_empty());
            });
            assert_visited_once(&counts, batch_size);
        }
    }

    #[test]
    #[should_panic(expected = "The batch size must be positive")]
    fn test_zero_batch_size() {
        IndexCursor::new(0..1, 0);
    }
}
