/*
 * SPDX-FileCopyrightText: 2026 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use std::sync::{Mutex, PoisonError};

/// A floating-point accumulator that can be incremented concurrently.
///
/// Any number of threads holding a shared reference can [`add`](Self::add)
/// to the accumulator; each addition takes an internal lock for the duration
/// of a single floating-point sum.
///
/// Reading and resetting the value, instead, requires an exclusive
/// reference: [`get_mut`](Self::get_mut), [`take`](Self::take) and
/// [`into_inner`](Self::into_inner) do not lock. In this way the window in
/// which unsynchronized access is legal (e.g., after a barrier has joined all
/// threads that were adding) is enforced by the borrow checker: as long as
/// some thread can still call [`add`](Self::add), nobody can obtain a
/// mutable reference.
///
/// Note that the order in which concurrent additions are performed is
/// unspecified, so the final value is determined only up to floating-point
/// associativity.
///
/// # Examples
///
/// ```
/// use webrank::utils::Accumulator;
///
/// let mut deltas: Vec<Accumulator> = (0..4).map(|_| Accumulator::default()).collect();
/// let pool = webrank::thread_pool![4];
/// pool.broadcast(|ctx| deltas[ctx.index()].add(0.5));
///
/// // The broadcast has returned: we have exclusive access again
/// let taken: Vec<f64> = deltas.iter_mut().map(Accumulator::take).collect();
/// assert_eq!(taken, vec![0.5; 4]);
/// assert_eq!(*deltas[0].get_mut(), 0.0);
/// ```
#[derive(Debug, Default)]
pub struct Accumulator(Mutex<f64>);

impl Accumulator {
    /// Creates a new accumulator with the given initial value.
    pub fn new(value: f64) -> Self {
        Self(Mutex::new(value))
    }

    /// Adds `x` to the accumulator.
    ///
    /// A thread that panicked while holding the lock cannot leave the value
    /// in an inconsistent state, so poisoning is ignored.
    #[inline]
    pub fn add(&self, x: f64) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) += x;
    }

    /// Returns a mutable reference to the value without locking.
    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut f64 {
        self.0.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value, resetting the accumulator to zero, without locking.
    #[inline(always)]
    pub fn take(&mut self) -> f64 {
        std::mem::take(self.get_mut())
    }

    /// Consumes the accumulator, returning its value.
    pub fn into_inner(self) -> f64 {
        self.0.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_concurrent_add() {
        let pool = crate::thread_pool![8];
        let acc = Accumulator::new(1.0);
        // Integer-valued floats: the sum is exact regardless of the order
        pool.broadcast(|_| {
            for _ in 0..1000 {
                acc.add(1.0);
            }
        });
        assert_eq!(acc.into_inner(), 8001.0);
    }

    #[test]
    fn test_take_resets() {
        let mut acc = Accumulator::default();
        acc.add(2.5);
        acc.add(-0.5);
        assert_eq!(acc.take(), 2.0);
        assert_eq!(acc.take(), 0.0);
        *acc.get_mut() = 3.0;
        assert_eq!(acc.into_inner(), 3.0);
    }
}
