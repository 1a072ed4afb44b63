/*
 * SPDX-FileCopyrightText: 2026 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![doc = include_str!("../README.md")]
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]
#![deny(unused_doc_comments)]

use anyhow::{Context, Result, anyhow, bail, ensure};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};
use webrank::prelude::RankedPage;

pub mod pagerank;

/// Parses a positive number of threads.
pub fn num_threads_parser(arg: &str) -> Result<usize> {
    let num_threads = arg.parse::<usize>()?;
    ensure!(num_threads > 0, "Number of threads must be greater than 0");
    Ok(num_threads)
}

/// The size of the pool running the computation.
#[derive(Args, Debug)]
pub struct NumThreadsArg {
    #[arg(short = 'j', long, default_value_t = rayon::current_num_threads().max(1), value_parser = num_threads_parser)]
    /// The number of threads to use.
    pub num_threads: usize,
}

#[derive(Serialize)]
struct JsonRank<'a> {
    id: &'a str,
    rank: f64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
/// Formats for storing ranked pages.
pub enum RankFormat {
    /// ASCII format, one page per line: the identifier, a tab, and the rank.
    Ascii,
    /// A JSON array of objects with fields `id` and `rank`.
    Json,
}

impl RankFormat {
    /// Stores ranked pages in the specified `path` using the format defined
    /// by `self`.
    ///
    /// In ASCII format, `precision` is used to truncate ranks to the specified
    /// number of decimal digits; if `None`, the shortest representation that
    /// parses back to the same value is used. In JSON format, `precision` is
    /// ignored.
    pub fn store(
        &self,
        path: impl AsRef<Path>,
        pages: &[RankedPage],
        precision: Option<usize>,
    ) -> Result<()> {
        create_parent_dir(&path)?;
        let path_display = path.as_ref().display();
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Could not create {}", path_display))?;
        let mut file = BufWriter::new(file);

        match self {
            RankFormat::Ascii => {
                log::info!("Storing in ASCII format at {}", path_display);
                for page in pages {
                    let rank = page.rank;
                    match precision {
                        None => writeln!(file, "{}\t{}", page.id, rank),
                        Some(precision) => writeln!(file, "{}\t{rank:.precision$}", page.id),
                    }
                    .with_context(|| format!("Could not write ranks to {}", path_display))?;
                }
            }
            RankFormat::Json => {
                log::info!("Storing in JSON format at {}", path_display);
                let json: Vec<_> = pages
                    .iter()
                    .map(|page| JsonRank {
                        id: page.id.as_str(),
                        rank: page.rank,
                    })
                    .collect();
                serde_json::to_writer(&mut file, &json)
                    .with_context(|| format!("Could not write ranks to {}", path_display))?;
            }
        }

        file.flush()
            .with_context(|| format!("Could not flush {}", path_display))?;
        Ok(())
    }
}

/// Creates the pool shared by all phases of a computation.
pub fn get_thread_pool(num_threads: usize) -> Result<rayon::ThreadPool> {
    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .context("Failed to create thread pool")?;
    log::info!("Using {} threads", thread_pool.current_num_threads());
    Ok(thread_pool)
}

/// Creates the directories that will contain an output file.
pub fn create_parent_dir(file_path: impl AsRef<Path>) -> Result<()> {
    if let Some(parent_dir) = file_path.as_ref().parent() {
        std::fs::create_dir_all(parent_dir).with_context(|| {
            format!(
                "Failed to create the directory {:?}",
                parent_dir.to_string_lossy()
            )
        })?;
    }
    Ok(())
}

/// Parses a log interval such as `1m30s`; a trailing number without a suffix
/// is in milliseconds.
fn parse_duration(value: &str) -> Result<Duration> {
    if value.is_empty() {
        bail!("Empty duration string, if you want every 0 milliseconds use `0`.");
    }
    let mut duration = Duration::from_secs(0);
    let mut acc = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() {
            acc.push(c);
        } else if c.is_whitespace() {
            continue;
        } else {
            let dur = acc.parse::<u64>()?;
            match c {
                's' => duration += Duration::from_secs(dur),
                'm' => duration += Duration::from_secs(dur * 60),
                'h' => duration += Duration::from_secs(dur * 60 * 60),
                'd' => duration += Duration::from_secs(dur * 60 * 60 * 24),
                _ => return Err(anyhow!("Invalid duration suffix: {}", c)),
            }
            acc.clear();
        }
    }
    if !acc.is_empty() {
        let dur = acc.parse::<u64>()?;
        duration += Duration::from_millis(dur);
    }
    Ok(duration)
}

/// Installs `env_logger`, prefixing each record with a timestamp, the time
/// elapsed since startup and the thread id.
pub fn init_env_logger() -> Result<()> {
    use jiff::SpanRound;
    use jiff::fmt::friendly::{Designator, Spacing, SpanPrinter};

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    let start = std::time::Instant::now();
    let printer = SpanPrinter::new()
        .spacing(Spacing::None)
        .designator(Designator::Compact);
    let span_round = SpanRound::new()
        .largest(jiff::Unit::Day)
        .smallest(jiff::Unit::Millisecond)
        .days_are_24_hours();

    builder.format(move |buf, record| {
        let Ok(ts) = jiff::Timestamp::try_from(SystemTime::now()) else {
            return Err(std::io::Error::other("Failed to get timestamp"));
        };
        let style = buf.default_level_style(record.level());
        let elapsed = start.elapsed();
        let span = jiff::Span::new()
            .seconds(elapsed.as_secs() as i64)
            .milliseconds(elapsed.subsec_millis() as i64);
        let span = span.round(span_round).map_err(std::io::Error::other)?;
        writeln!(
            buf,
            "{} {} {style}{}{style:#} [{:?}] {} - {}",
            ts.strftime("%F %T%.3f"),
            printer.span_to_string(&span),
            record.level(),
            std::thread::current().id(),
            record.target(),
            record.args()
        )
    });
    builder.try_init()?;
    Ok(())
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    #[arg(long, value_parser = parse_duration, global=true, display_order = 1000)]
    /// How often to log the progress of identifier generation and of the
    /// iterations (e.g., "30s", "2m"; plain numbers are milliseconds).
    pub log_interval: Option<Duration>,
}

#[derive(Subcommand, Debug)]
pub enum SubCommands {
    #[clap(name = "pagerank", visible_alias = "pr")]
    PageRank(pagerank::CliArgs),
}

#[derive(Parser, Debug)]
#[command(name = "webrank", version)]
/// Computes the PageRank of pages identified by the digest of their content.
///
/// Log verbosity is set by the RUST_LOG environment variable (default: info).
pub struct Cli {
    #[command(subcommand)]
    pub command: SubCommands,
    #[clap(flatten)]
    pub args: GlobalArgs,
}

/// The entry point of the command-line interface.
pub fn cli_main<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let start = std::time::Instant::now();
    let cli = Cli::parse_from(args);
    match cli.command {
        SubCommands::PageRank(args) => {
            pagerank::main(cli.args, args)?;
        }
    }

    log::info!(
        "The command took {}",
        pretty_print_elapsed(start.elapsed().as_secs_f64())
    );

    Ok(())
}

/// Formats the running time of a command.
fn pretty_print_elapsed(elapsed: f64) -> String {
    let mut result = String::new();
    let mut elapsed_seconds = elapsed as u64;
    let days = elapsed_seconds / (60 * 60 * 24);
    elapsed_seconds %= 60 * 60 * 24;
    let hours = elapsed_seconds / (60 * 60);
    elapsed_seconds %= 60 * 60;
    let minutes = elapsed_seconds / 60;

    for (value, unit) in [(days, "day"), (hours, "hour"), (minutes, "minute")] {
        match value {
            0 => {}
            1 => result.push_str(&format!("1 {unit} ")),
            _ => result.push_str(&format!("{value} {unit}s ")),
        }
    }

    result.push_str(&format!("{:.3} seconds ({}s)", elapsed % 60.0, elapsed));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() -> Result<()> {
        assert_eq!(parse_duration("1500")?, Duration::from_millis(1500));
        assert_eq!(parse_duration("10s")?, Duration::from_secs(10));
        assert_eq!(
            parse_duration("1d2h3m4s567")?,
            Duration::from_millis(93_784_567)
        );
        assert_eq!(parse_duration("1m 30s")?, Duration::from_secs(90));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("3w").is_err());
        Ok(())
    }

    #[test]
    fn test_num_threads_parser() {
        assert_eq!(num_threads_parser("4").ok(), Some(4));
        assert!(num_threads_parser("0").is_err());
        assert!(num_threads_parser("many").is_err());
    }

    #[test]
    fn test_pretty_print_elapsed() {
        assert_eq!(pretty_print_elapsed(1.5), "1.500 seconds (1.5s)");
        assert_eq!(
            pretty_print_elapsed(3_725.0),
            "1 hour 2 minutes 5.000 seconds (3725s)"
        );
    }

    mod rank_format {
        use super::*;
        use webrank::prelude::PageId;

        fn pages() -> Vec<RankedPage> {
            vec![
                RankedPage {
                    id: PageId::from("aa"),
                    rank: 0.25,
                },
                RankedPage {
                    id: PageId::from("bb"),
                    rank: 0.75,
                },
            ]
        }

        #[test]
        fn test_ascii() -> Result<()> {
            let dir = tempfile::tempdir()?;
            let path = dir.path().join("ranks.txt");
            RankFormat::Ascii.store(&path, &pages(), None)?;
            let content = std::fs::read_to_string(&path)?;
            assert_eq!(content, "aa\t0.25\nbb\t0.75\n");
            Ok(())
        }

        #[test]
        fn test_ascii_with_precision() -> Result<()> {
            let dir = tempfile::tempdir()?;
            let path = dir.path().join("nested").join("ranks.txt");
            RankFormat::Ascii.store(&path, &pages(), Some(3))?;
            let content = std::fs::read_to_string(&path)?;
            assert_eq!(content, "aa\t0.250\nbb\t0.750\n");
            Ok(())
        }

        #[test]
        fn test_json() -> Result<()> {
            let dir = tempfile::tempdir()?;
            let path = dir.path().join("ranks.json");
            RankFormat::Json.store(&path, &pages(), None)?;
            let content = std::fs::read_to_string(&path)?;
            let parsed: serde_json::Value = serde_json::from_str(&content)?;
            assert_eq!(parsed[0]["id"], "aa");
            assert_eq!(parsed[1]["rank"], 0.75);
            assert_eq!(parsed.as_array().map(Vec::len), Some(2));
            Ok(())
        }
    }
}
