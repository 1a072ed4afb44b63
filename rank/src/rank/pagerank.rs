/*
 * SPDX-FileCopyrightText: 2026 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Parallel phase-synchronized PageRank.
//!
//! This implementation computes the PageRank of the pages of a [`Network`]
//! using a fixed pool of threads. Each iteration is split into _phases_; all
//! threads of the pool take part in each phase, and a phase starts only after
//! all threads have completed the previous one. Within a phase, threads
//! claim batches of pages from a shared cursor (see [`crate::utils`]).
//!
//! # The formula
//!
//! If we denote with *n* the number of pages, with α the damping factor, with
//! *d*(*j*) the number of links of page *j*, and with *D* the set of
//! _dangling_ pages (pages without links), an iteration computes
//!
//! > *xᵢ*⁽*ᵗ* ⁺ ¹⁾ = (1 − α) / *n*  +  α ( ∑_(*j* → *i*) *xⱼ*⁽*ᵗ*⁾ / *d*(*j*)
//! > +  ∑_(*j* ∈ *D*) *xⱼ*⁽*ᵗ*⁾ / *n* ),
//!
//! starting from the uniform vector. In other words, dangling pages
//! distribute their rank uniformly among all pages (the _weakly
//! preferential_ variant with uniform preference), so the ranks always sum to
//! one.
//!
//! # Phases
//!
//! Before iterating, an _initialization_ phase [generates the
//! identifier](crate::network::Page::generate_id) of each page (possibly an
//! expensive operation, as it might involve an external process), and inserts
//! it into a shared map from identifiers to page positions. Only the
//! insertion is serialized. Then, links are resolved to positions in
//! parallel.
//!
//! Each iteration consists of three parallel phases:
//!
//! 1. the _dangling-sum_ phase computes the sum *s* of the ranks of the
//!    dangling pages;
//! 2. the _distribution_ phase adds, for each page *j* and each link *j* → *i*,
//!    the share *xⱼ* / *d*(*j*) to the [accumulator](Accumulator) of *i*;
//! 3. the _apply_ phase computes for each page *i*, using its accumulated
//!    delta δᵢ, the new rank (1 − α) / *n* + α (δᵢ + *s* / *n*), resets δᵢ,
//!    and accumulates the ℓ₁ norm of the difference with the previous rank.
//!
//! The distribution phase is the only one in which threads write to shared
//! state with no partitioning; the accumulators are locked for the time of
//! a sum. The apply phase, instead, receives disjoint mutable batches of the
//! rank vector and of the accumulators, so it needs no locking at all.
//!
//! Since the additions to the accumulators are performed in an order that
//! depends on scheduling, results obtained with different numbers of threads
//! or batch sizes are identical only up to floating-point associativity.
//!
//! # Stopping criteria
//!
//! After each iteration the ℓ₁ norm of the difference between successive
//! approximations (the _total difference_) is passed to a [`Predicate`]
//! deciding whether the computation has converged (see [`preds`]). If the
//! predicate is not satisfied within the given maximum number of iterations,
//! the computation fails with [`PageRankError::NotConverged`]: an approximate
//! result is never returned.

pub mod preds {
    //! Predicates deciding whether a computation has converged.
    //!
    //! You can combine the predicates using the `and` and `or` methods
    //! provided by the [`Predicate`] trait.
    //!
    //! # Examples
    //! ```
    //! # fn main() -> Result<(), Box<dyn std::error::Error>> {
    //! use predicates::prelude::*;
    //! use webrank::rank::pagerank::preds::{L1Bound, L1Norm, PredParams};
    //!
    //! let predicate = L1Norm::try_from(1E-6)?.and(L1Bound::try_from(1E-5)?);
    //! assert!(predicate.eval(&PredParams {
    //!     iteration: 10,
    //!     total_difference: 1E-7,
    //!     alpha: 0.85,
    //! }));
    //! #     Ok(())
    //! # }
    //! ```

    use super::PageRankError;
    use predicates::{Predicate, reflection::PredicateReflection};
    use std::fmt::Display;

    #[doc(hidden)]
    /// This structure is passed to stopping predicates to provide the
    /// information that is needed to evaluate them.
    #[derive(Debug)]
    pub struct PredParams {
        pub iteration: usize,
        pub total_difference: f64,
        pub alpha: f64,
    }

    fn check_threshold(threshold: f64) -> Result<f64, PageRankError> {
        // Note that this also rejects NaN
        if threshold > 0.0 {
            Ok(threshold)
        } else {
            Err(PageRankError::InvalidTolerance(threshold))
        }
    }

    /// Converged when the ℓ₁ norm of the difference between successive
    /// approximations is smaller than a given threshold.
    #[derive(Debug, Clone)]
    pub struct L1Norm {
        threshold: f64,
    }

    impl L1Norm {
        pub const DEFAULT_THRESHOLD: f64 = 1E-6;
    }

    impl TryFrom<f64> for L1Norm {
        type Error = PageRankError;
        fn try_from(threshold: f64) -> Result<Self, PageRankError> {
            Ok(L1Norm {
                threshold: check_threshold(threshold)?,
            })
        }
    }

    impl Default for L1Norm {
        fn default() -> Self {
            L1Norm {
                threshold: Self::DEFAULT_THRESHOLD,
            }
        }
    }

    impl Display for L1Norm {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_fmt(format_args!("(norm < {})", self.threshold))
        }
    }

    impl PredicateReflection for L1Norm {}
    impl Predicate<PredParams> for L1Norm {
        fn eval(&self, pred_params: &PredParams) -> bool {
            pred_params.total_difference < self.threshold
        }
    }

    /// Converged when an upper bound on the ℓ₁ error with respect to the true
    /// PageRank vector is smaller than a given threshold.
    ///
    /// The bound is α / (1 − α) · ‖*x*(*t*) − *x*(*t* − 1)‖₁, where *x*(*t*)
    /// is the rank vector at iteration *t*.
    #[derive(Debug, Clone)]
    pub struct L1Bound {
        threshold: f64,
    }

    impl TryFrom<f64> for L1Bound {
        type Error = PageRankError;
        fn try_from(threshold: f64) -> Result<Self, PageRankError> {
            Ok(L1Bound {
                threshold: check_threshold(threshold)?,
            })
        }
    }

    impl Display for L1Bound {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_fmt(format_args!("(error bound < {})", self.threshold))
        }
    }

    impl PredicateReflection for L1Bound {}
    impl Predicate<PredParams> for L1Bound {
        fn eval(&self, pred_params: &PredParams) -> bool {
            pred_params.total_difference * pred_params.alpha / (1.0 - pred_params.alpha)
                < self.threshold
        }
    }
}

use crate::ids::IdError;
use crate::network::{Network, Page, PageId};
use crate::utils::{Accumulator, IndexCursor, IterCursor, SplitCursor};
use dsi_progress_logger::{ConcurrentProgressLog, ProgressLog, no_logging};
use kahan::KahanSum;
use predicates::Predicate;
use rayon::{ThreadPool, ThreadPoolBuildError};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use thiserror::Error;

/// Errors returned by a [`PageRank`] computation.
#[derive(Error, Debug)]
pub enum PageRankError {
    /// The stopping criterion was not satisfied within the maximum number
    /// of iterations.
    #[error(
        "No convergence within {iterations} iteration(s): total difference {total_difference}, stopping criterion {criterion}"
    )]
    NotConverged {
        iterations: usize,
        total_difference: f64,
        criterion: String,
    },
    /// The identifier of a page could not be generated.
    #[error("Could not generate the identifier of the page at position {position}")]
    IdAssignment {
        position: usize,
        #[source]
        source: IdError,
    },
    /// Two pages have the same identifier (i.e., the same content).
    #[error("The pages at positions {first} and {second} have the same identifier {id}")]
    DuplicateId {
        id: PageId,
        first: usize,
        second: usize,
    },
    /// A page links to an identifier that is not the identifier of any page.
    #[error("Page {page} links to {target}, which is not in the network")]
    UnknownLink { page: PageId, target: PageId },
    /// The network returned a number of pages different from the declared one.
    #[error("The network declares {expected} page(s) but enumerates {actual}")]
    PageCount { expected: usize, actual: usize },
    #[error("The damping factor must be in [0 . . 1), got {0}")]
    InvalidAlpha(f64),
    #[error("The tolerance must be positive, got {0}")]
    InvalidTolerance(f64),
    #[error("Could not build the thread pool")]
    ThreadPool(#[from] ThreadPoolBuildError),
    /// The computation was interrupted using the [interrupt
    /// flag](PageRank::interrupt).
    #[error("The computation was interrupted")]
    Interrupted,
}

/// A page identifier with its rank.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPage {
    pub id: PageId,
    pub rank: f64,
}

/// The outcome of a converged computation.
#[derive(Debug, Clone)]
pub struct Ranking {
    /// The ranked pages, in the order of [`Network::pages`].
    pub pages: Vec<RankedPage>,
    /// The number of iterations performed.
    pub iterations: usize,
    /// The ℓ₁ norm of the difference between the last two approximations.
    pub total_difference: f64,
}

/// The network after initialization: identifiers, links and dangling pages,
/// all expressed by page position.
struct Topology {
    ids: Vec<PageId>,
    links: Box<[Box<[usize]>]>,
    dangling: Box<[usize]>,
}

/// Computes PageRank using a fixed pool of threads.
///
/// The pool is created once, when the structure is built, and reused by all
/// phases of all computations. The structure is configured via setters, and
/// computations are started by [`compute`](Self::compute) or by the more
/// flexible [`run`](Self::run) and [`run_with_logging`](Self::run_with_logging).
///
/// # Examples
///
/// ```
/// use webrank::prelude::*;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // a → b, b → c, c → a, d → a
/// let mut network = VecNetwork::new(Sha256IdGenerator);
/// network.add_page("a", ["b"])?;
/// network.add_page("b", ["c"])?;
/// network.add_page("c", ["a"])?;
/// network.add_page("d", ["a"])?;
///
/// let mut pagerank = PageRank::new(4)?;
/// pagerank.batch_size(2);
/// assert_eq!(pagerank.name(), "ParallelPageRank[4]");
///
/// let ranks = pagerank.compute(&network, 0.85, 100, 1E-9)?;
///
/// assert_eq!(ranks.len(), 4);
/// assert!((ranks.iter().map(|p| p.rank).sum::<f64>() - 1.0).abs() < 1E-9);
/// // Nobody links to d
/// assert!((ranks[3].rank - 0.15 / 4.0).abs() < 1E-9);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PageRank {
    thread_pool: ThreadPool,
    batch_size: usize,
    interrupt: Option<Arc<AtomicBool>>,
}

impl Display for PageRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParallelPageRank[{}]", self.num_threads())
    }
}

impl PageRank {
    /// The default number of pages claimed at once by a thread.
    pub const DEFAULT_BATCH_SIZE: usize = 8;

    /// Creates a new PageRank computer using a pool of `num_threads` threads.
    ///
    /// If `num_threads` is zero, the number of threads is chosen by
    /// [Rayon](rayon::ThreadPoolBuilder::num_threads).
    pub fn new(num_threads: usize) -> Result<Self, PageRankError> {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        Ok(Self::with_thread_pool(thread_pool))
    }

    /// Creates a new PageRank computer using the given thread pool.
    pub fn with_thread_pool(thread_pool: ThreadPool) -> Self {
        Self {
            thread_pool,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            interrupt: None,
        }
    }

    /// Sets the number of pages claimed at once by a thread.
    ///
    /// Larger batches reduce contention on the shared cursors; smaller
    /// batches balance the load better.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn batch_size(&mut self, batch_size: usize) -> &mut Self {
        assert!(batch_size > 0, "The batch size must be positive");
        self.batch_size = batch_size;
        self
    }

    /// Sets a flag that, when set to true, interrupts the computation at the
    /// end of the current phase with [`PageRankError::Interrupted`].
    pub fn interrupt(&mut self, flag: Option<Arc<AtomicBool>>) -> &mut Self {
        self.interrupt = flag;
        self
    }

    /// Returns the number of threads of the pool.
    pub fn num_threads(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    /// Returns a human-readable name for this computer, including its number
    /// of threads.
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Computes the PageRank of the pages of `network`.
    ///
    /// The computation stops as soon as the ℓ₁ norm of the difference between
    /// successive approximations is smaller than `tolerance`, and fails with
    /// [`PageRankError::NotConverged`] if this does not happen within
    /// `max_iterations` iterations.
    ///
    /// Pages are returned in the order of [`Network::pages`].
    pub fn compute(
        &self,
        network: &impl Network,
        alpha: f64,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<Vec<RankedPage>, PageRankError> {
        let converged = preds::L1Norm::try_from(tolerance)?;
        Ok(self.run(network, alpha, max_iterations, converged)?.pages)
    }

    /// Computes the PageRank of the pages of `network` until the given
    /// predicate is satisfied.
    pub fn run(
        &self,
        network: &impl Network,
        alpha: f64,
        max_iterations: usize,
        converged: impl Predicate<preds::PredParams>,
    ) -> Result<Ranking, PageRankError> {
        self.run_with_logging(
            network,
            alpha,
            max_iterations,
            converged,
            no_logging![],
            no_logging![],
        )
    }

    /// Computes the PageRank of the pages of `network` until the given
    /// predicate is satisfied, logging progress.
    ///
    /// `pl` is a sequential [`ProgressLog`] used to count iterations. `cpl` is
    /// a [`ConcurrentProgressLog`] used to log the initialization phase, in
    /// which page identifiers are generated. Their options will be preserved,
    /// making thus possible to customize the logs.
    ///
    /// It is possible to specify either `pl` or `cpl` as
    /// [`no_logging![]`](dsi_progress_logger::no_logging) if you don't want to
    /// log the corresponding part of the computation.
    pub fn run_with_logging(
        &self,
        network: &impl Network,
        alpha: f64,
        max_iterations: usize,
        converged: impl Predicate<preds::PredParams>,
        pl: &mut impl ProgressLog,
        cpl: &mut impl ConcurrentProgressLog,
    ) -> Result<Ranking, PageRankError> {
        if !(0.0..1.0).contains(&alpha) {
            // Note that 0.0..1.0 is [0.0..1.0) in mathematical notation
            return Err(PageRankError::InvalidAlpha(alpha));
        }

        let n = network.num_pages();
        log::info!("Computer: {}", self);
        log::info!("Alpha: {}", alpha);
        log::info!("Batch size: {}", self.batch_size);
        log::info!("Stopping criterion: {}", converged);
        log::info!("Maximum number of iterations: {}", max_iterations);

        if n == 0 {
            return Ok(Ranking {
                pages: vec![],
                iterations: 0,
                total_difference: 0.0,
            });
        }

        self.check_interrupt()?;
        let topology = self.init(network, cpl)?;
        log::info!("{} dangling pages", topology.dangling.len());

        let mut rank = vec![1.0 / n as f64; n].into_boxed_slice();
        let mut delta: Box<[Accumulator]> = (0..n).map(|_| Accumulator::default()).collect();
        let mut total_difference = f64::INFINITY;

        pl.item_name("iteration");
        pl.expected_updates(Some(max_iterations));
        pl.start(format!(
            "Computing PageRank (alpha={alpha}, batch size={})...",
            self.batch_size
        ));

        for iteration in 1..=max_iterations {
            self.check_interrupt()?;
            let dangling_sum = self.dangling_sum(&topology.dangling, &rank);

            self.check_interrupt()?;
            self.distribute(&topology.links, &rank, &delta);

            self.check_interrupt()?;
            total_difference = self.apply(&mut rank, &mut delta, dangling_sum, alpha);

            log::info!(
                "Iteration {}: dangling sum = {}, total difference = {}",
                iteration,
                dangling_sum,
                total_difference
            );
            pl.update_and_display();

            if converged.eval(&preds::PredParams {
                iteration,
                total_difference,
                alpha,
            }) {
                pl.done();
                let pages = topology
                    .ids
                    .into_iter()
                    .zip(rank)
                    .map(|(id, rank)| RankedPage { id, rank })
                    .collect();
                return Ok(Ranking {
                    pages,
                    iterations: iteration,
                    total_difference,
                });
            }
        }

        pl.done();
        Err(PageRankError::NotConverged {
            iterations: max_iterations,
            total_difference,
            criterion: converged.to_string(),
        })
    }

    fn check_interrupt(&self) -> Result<(), PageRankError> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(PageRankError::Interrupted),
            _ => Ok(()),
        }
    }

    /// Generates the identifiers of all pages, and resolves links to page
    /// positions.
    fn init<N: Network>(
        &self,
        network: &N,
        cpl: &mut impl ConcurrentProgressLog,
    ) -> Result<Topology, PageRankError> {
        let n = network.num_pages();
        let generator = network.generator();
        let cursor = IterCursor::new(network.pages().enumerate(), self.batch_size);
        let index = Mutex::new(HashMap::<PageId, usize>::with_capacity(n));
        let failed = AtomicBool::new(false);

        cpl.item_name("page");
        cpl.expected_updates(Some(n));
        cpl.start("Generating page identifiers...");

        let claimed = self.thread_pool.broadcast(|_| {
            let mut local_cpl = cpl.clone();
            let mut claimed = Vec::new();
            let mut batch = Vec::with_capacity(self.batch_size.min(n));

            while !failed.load(Ordering::Relaxed) && cursor.next_batch(&mut batch) {
                let count = batch.len();
                for (position, page) in batch.drain(..) {
                    let id = match page.generate_id(generator) {
                        Ok(id) => id.clone(),
                        Err(source) => {
                            failed.store(true, Ordering::Relaxed);
                            return Err(PageRankError::IdAssignment { position, source });
                        }
                    };

                    let previous = index
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(id.clone(), position);

                    if let Some(other) = previous {
                        failed.store(true, Ordering::Relaxed);
                        return Err(PageRankError::DuplicateId {
                            id,
                            first: other.min(position),
                            second: other.max(position),
                        });
                    }
                    claimed.push((position, page, id));
                }
                local_cpl.update_with_count(count);
            }
            Ok(claimed)
        });

        cpl.done();

        let mut slots: Vec<Option<(&Page, PageId)>> = vec![None; n];
        let mut actual = 0;
        for claimed in claimed {
            for (position, page, id) in claimed? {
                actual += 1;
                if let Some(slot) = slots.get_mut(position) {
                    *slot = Some((page, id));
                }
            }
        }
        let (pages, ids): (Vec<&Page>, Vec<PageId>) = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .filter(|_| actual == n)
            .ok_or(PageRankError::PageCount { expected: n, actual })?
            .into_iter()
            .unzip();

        let index = index.into_inner().unwrap_or_else(PoisonError::into_inner);
        let links = self.resolve_links(&pages, &ids, &index)?;
        let dangling = pages
            .iter()
            .enumerate()
            .filter(|(_, page)| page.is_dangling())
            .map(|(position, _)| position)
            .collect();

        Ok(Topology {
            ids,
            links,
            dangling,
        })
    }

    /// Maps in parallel the links of each page to page positions.
    fn resolve_links(
        &self,
        pages: &[&Page],
        ids: &[PageId],
        index: &HashMap<PageId, usize>,
    ) -> Result<Box<[Box<[usize]>]>, PageRankError> {
        let mut links = vec![Box::<[usize]>::default(); pages.len()].into_boxed_slice();
        let cursor = SplitCursor::new((pages, (ids, &mut links[..])), self.batch_size);

        let results = self.thread_pool.broadcast(|_| {
            while let Some((pages, (ids, links))) = cursor.next_batch() {
                for ((page, id), links) in pages.iter().zip(ids).zip(links.iter_mut()) {
                    *links = page
                        .links()
                        .iter()
                        .map(|target| {
                            index
                                .get(target)
                                .copied()
                                .ok_or_else(|| PageRankError::UnknownLink {
                                    page: id.clone(),
                                    target: target.clone(),
                                })
                        })
                        .collect::<Result<_, _>>()?;
                }
            }
            Ok::<_, PageRankError>(())
        });

        drop(cursor);
        results.into_iter().collect::<Result<(), _>>()?;
        Ok(links)
    }

    /// Returns the sum of the ranks of the dangling pages.
    fn dangling_sum(&self, dangling: &[usize], rank: &[f64]) -> f64 {
        let cursor = IndexCursor::new(0..dangling.len(), self.batch_size);
        let dangling_sum = Accumulator::default();

        self.thread_pool.broadcast(|_| {
            let mut local_sum = KahanSum::<f64>::new();
            for batch in cursor.batches() {
                for &page in &dangling[batch] {
                    local_sum += rank[page];
                }
            }
            dangling_sum.add(local_sum.sum());
        });

        dangling_sum.into_inner()
    }

    /// Adds to the delta of each page the shares of rank of the pages linking
    /// to it.
    fn distribute(&self, links: &[Box<[usize]>], rank: &[f64], delta: &[Accumulator]) {
        let cursor = IndexCursor::new(0..links.len(), self.batch_size);

        self.thread_pool.broadcast(|_| {
            for batch in cursor.batches() {
                for page in batch {
                    let succ = &links[page];
                    // Dangling pages are accounted for by the dangling sum
                    if succ.is_empty() {
                        continue;
                    }
                    let share = rank[page] / succ.len() as f64;
                    for &target in succ.iter() {
                        delta[target].add(share);
                    }
                }
            }
        });
    }

    /// Folds deltas and the dangling sum into the ranks, resetting deltas, and
    /// returns the ℓ₁ norm of the difference between the old and new ranks.
    fn apply(
        &self,
        rank: &mut [f64],
        delta: &mut [Accumulator],
        dangling_sum: f64,
        alpha: f64,
    ) -> f64 {
        let n = rank.len() as f64;
        let teleport = (1.0 - alpha) / n;
        let dangling_share = dangling_sum / n;
        let cursor = SplitCursor::new((rank, delta), self.batch_size);
        let total_difference = Accumulator::default();

        self.thread_pool.broadcast(|_| {
            let mut local_difference = KahanSum::<f64>::new();
            while let Some((rank, delta)) = cursor.next_batch() {
                for (rank, delta) in rank.iter_mut().zip(delta.iter_mut()) {
                    let new_rank = teleport + alpha * (delta.take() + dangling_share);
                    local_difference += (new_rank - *rank).abs();
                    *rank = new_rank;
                }
            }
            total_difference.add(local_difference.sum());
        });

        total_difference.into_inner()
    }
}
