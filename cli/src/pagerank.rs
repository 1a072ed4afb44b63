/*
 * SPDX-FileCopyrightText: 2026 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::{GlobalArgs, NumThreadsArg, RankFormat, get_thread_pool};
use anyhow::{Context, Result, ensure};
use clap::Parser;
use dsi_progress_logger::{ProgressLog, concurrent_progress_logger, progress_logger};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use webrank::prelude::*;

/// How page identifiers are computed.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default)]
pub enum CliIds {
    /// Compute SHA-256 digests in process.
    #[default]
    Sha256,
    /// Run an external program for each page, feeding it the content on
    /// standard input and reading the digest from standard output.
    Process,
}

#[derive(Parser, Debug)]
#[command(
    name = "pagerank",
    about = "Compute PageRank using parallel phase-synchronized iteration.",
    long_about = None
)]
pub struct CliArgs {
    /// The file containing the pages, one per line: the content of the page
    /// followed by the contents of the linked pages, separated by tabs.
    pub pages: PathBuf,

    #[arg(short, long)]
    /// Where to store the ranks.
    pub output: PathBuf,

    #[arg(short, long, default_value_t = 0.85)]
    /// The damping factor α (must be in the interval [0 . . 1).
    pub alpha: f64,

    #[arg(long, default_value_t = 100)]
    /// Maximum number of iterations.
    pub max_iter: usize,

    #[arg(short, long, default_value_t = 1e-6)]
    /// Stop when the ℓ₁ norm of the difference between successive
    /// approximations is below this threshold.
    pub tolerance: f64,

    #[clap(flatten)]
    pub num_threads: NumThreadsArg,

    #[arg(long, default_value_t = PageRank::DEFAULT_BATCH_SIZE)]
    /// The number of pages claimed at once by a thread (advanced option).
    pub batch_size: usize,

    #[arg(long, value_enum, default_value_t = CliIds::Sha256)]
    /// How to compute page identifiers.
    pub ids: CliIds,

    #[arg(long, default_value = ProcessIdGenerator::DEFAULT_PROGRAM)]
    /// The hashing program used with "--ids process". It receives the content
    /// on standard input and must print 64 hexadecimal digits first.
    pub hasher: String,

    #[arg(long, default_value_t = 0)]
    /// How many times to retry starting the hashing program, or talking to it.
    pub retries: usize,

    #[arg(long, value_enum, default_value_t = RankFormat::Ascii)]
    /// The output format for the ranks.
    pub fmt: RankFormat,

    #[arg(long)]
    /// Decimal digits for ASCII output.
    pub precision: Option<usize>,
}

pub fn main(global_args: GlobalArgs, args: CliArgs) -> Result<()> {
    ensure!(
        // Note that 0.0..1.0 is [0.0..1.0) in mathematical notation
        (0.0..1.0).contains(&args.alpha),
        "The damping factor must be in [0 . . 1), got {}",
        args.alpha
    );
    ensure!(
        args.tolerance > 0.0,
        "The tolerance must be positive, got {}",
        args.tolerance
    );
    ensure!(args.batch_size > 0, "The batch size must be positive");

    match args.ids {
        CliIds::Sha256 => pagerank(global_args, &args, Sha256IdGenerator),
        CliIds::Process => {
            let mut generator = ProcessIdGenerator::new(&args.hasher);
            generator.retries(args.retries);
            pagerank(global_args, &args, generator)
        }
    }
}

pub fn pagerank<G: IdGenerator>(
    global_args: GlobalArgs,
    args: &CliArgs,
    generator: G,
) -> Result<()> {
    let mut pl = progress_logger![];
    if let Some(log_interval) = global_args.log_interval {
        pl.log_interval(log_interval);
    }

    let mut cpl = concurrent_progress_logger![];
    if let Some(log_interval) = global_args.log_interval {
        cpl.log_interval(log_interval);
    }

    log::info!("Loading pages from {}", args.pages.display());
    let network = load_network(&args.pages, generator)?;
    log::info!("Loaded {} pages", network.num_pages());

    let thread_pool = get_thread_pool(args.num_threads.num_threads)?;
    let mut pr = PageRank::with_thread_pool(thread_pool);
    pr.batch_size(args.batch_size);

    let ranking = pr.run_with_logging(
        &network,
        args.alpha,
        args.max_iter,
        preds::L1Norm::try_from(args.tolerance)?,
        &mut pl,
        &mut cpl,
    )?;

    log::info!(
        "Completed after {} iteration(s), total difference = {}",
        ranking.iterations,
        ranking.total_difference
    );

    args.fmt.store(&args.output, &ranking.pages, args.precision)?;

    Ok(())
}

/// Reads a network from a file containing one page per line.
///
/// Each line contains tab-separated fields: the content of the page, followed
/// by the contents of the pages it links to. Empty lines and lines starting
/// with `#` are skipped.
pub fn load_network<G: IdGenerator>(
    path: impl AsRef<Path>,
    generator: G,
) -> Result<VecNetwork<G>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Could not open {}", path.display()))?;

    let mut network = VecNetwork::new(generator);
    // Link targets are usually repeated, and identifiers might be expensive
    let mut link_ids = HashMap::<String, PageId>::new();

    for (line_number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| {
            format!("Could not read line {} of {}", line_number + 1, path.display())
        })?;
        // CRLF line endings
        let line = line.strip_suffix('\r').unwrap_or(&line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split('\t');
        let content = fields.next().unwrap_or_default();
        let mut links = Vec::new();
        for target in fields {
            let id = match link_ids.get(target) {
                Some(id) => id.clone(),
                None => {
                    let id = network
                        .generator()
                        .generate_id(target.as_bytes())
                        .with_context(|| {
                            format!(
                                "Could not compute the identifier of a link at line {} of {}",
                                line_number + 1,
                                path.display()
                            )
                        })?;
                    link_ids.insert(target.to_owned(), id.clone());
                    id
                }
            };
            links.push(id);
        }
        network.push(Page::new(content, links));
    }

    Ok(network)
}
