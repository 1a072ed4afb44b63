/*
 * SPDX-FileCopyrightText: 2026 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::Result;
use std::path::{Path, PathBuf};
use webrank::prelude::*;
use webrank_cli::cli_main;
use webrank_cli::pagerank::load_network;

const PAGES: &str = "\
# a small web
home\tabout\tblog

about\thome
blog\thome\tabout\tarchive
archive
";

fn write_pages(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("pages.tsv");
    std::fs::write(&path, PAGES)?;
    Ok(path)
}

fn run(pages: &Path, output: &Path, extra: &[&str]) -> Result<()> {
    let mut args = vec![
        "webrank".to_owned(),
        "pagerank".to_owned(),
        pages.display().to_string(),
        "-o".to_owned(),
        output.display().to_string(),
        "-j".to_owned(),
        "3".to_owned(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    cli_main(args)
}

fn parse_ascii(path: &Path) -> Result<Vec<(String, f64)>> {
    std::fs::read_to_string(path)?
        .lines()
        .map(|line| -> Result<(String, f64)> {
            let (id, rank) = line
                .split_once('\t')
                .ok_or_else(|| anyhow::anyhow!("Malformed line {line:?}"))?;
            Ok((id.to_owned(), rank.parse()?))
        })
        .collect()
}

#[test]
fn test_load_network() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let network = load_network(write_pages(dir.path())?, Sha256IdGenerator)?;
    assert_eq!(network.num_pages(), 4);
    let pages = network.as_slice();
    assert_eq!(pages[0].content(), b"home");
    assert_eq!(pages[0].links().len(), 2);
    assert_eq!(pages[2].links().len(), 3);
    assert!(pages[3].is_dangling());
    assert!(pages[1].links().contains(&Sha256IdGenerator.generate_id(b"home")?));
    Ok(())
}

#[test]
fn test_load_network_crlf() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pages.tsv");
    std::fs::write(&path, PAGES.replace('\n', "\r\n"))?;
    let network = load_network(&path, Sha256IdGenerator)?;
    assert_eq!(network.num_pages(), 4);
    let pages = network.as_slice();
    assert_eq!(pages[3].content(), b"archive");
    assert!(pages[2].links().contains(&Sha256IdGenerator.generate_id(b"archive")?));

    let output = dir.path().join("ranks.txt");
    run(&path, &output, &[])?;
    assert_eq!(parse_ascii(&output)?.len(), 4);
    Ok(())
}

#[test]
fn test_ascii_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pages = write_pages(dir.path())?;
    let output = dir.path().join("out").join("ranks.txt");
    run(
        &pages,
        &output,
        &["--tolerance", "1e-10", "--max-iter", "1000", "--batch-size", "1"],
    )?;

    let ranks = parse_ascii(&output)?;
    assert_eq!(ranks.len(), 4);
    for ((id, _), content) in ranks.iter().zip(["home", "about", "blog", "archive"]) {
        assert_eq!(id, Sha256IdGenerator.generate_id(content.as_bytes())?.as_str());
    }
    let sum: f64 = ranks.iter().map(|(_, rank)| rank).sum();
    assert!((sum - 1.0).abs() < 1E-9);
    // Everybody links to home
    assert!(ranks[1..].iter().all(|(_, rank)| *rank < ranks[0].1));
    Ok(())
}

#[test]
fn test_json_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pages = write_pages(dir.path())?;
    let ascii = dir.path().join("ranks.txt");
    let json = dir.path().join("ranks.json");
    run(&pages, &ascii, &["--tolerance", "1e-10", "--max-iter", "1000"])?;
    run(
        &pages,
        &json,
        &["--tolerance", "1e-10", "--max-iter", "1000", "--fmt", "json"],
    )?;

    let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json)?)?;
    let parsed = parsed
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Not an array"))?;
    let expected = parse_ascii(&ascii)?;
    assert_eq!(parsed.len(), expected.len());
    for (value, (id, rank)) in parsed.iter().zip(&expected) {
        assert_eq!(value["id"].as_str(), Some(id.as_str()));
        let json_rank = value["rank"].as_f64().unwrap_or(f64::NAN);
        assert!((json_rank - rank).abs() < 1E-9);
    }
    Ok(())
}

#[test]
fn test_process_ids() -> Result<()> {
    if std::process::Command::new(ProcessIdGenerator::DEFAULT_PROGRAM)
        .arg("--version")
        .output()
        .is_err()
    {
        eprintln!("sha256sum is not available, skipping");
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let pages = write_pages(dir.path())?;
    let in_process = dir.path().join("sha256.txt");
    let external = dir.path().join("process.txt");
    run(&pages, &in_process, &["--precision", "12"])?;
    run(&pages, &external, &["--precision", "12", "--ids", "process"])?;

    let in_process = parse_ascii(&in_process)?;
    let external = parse_ascii(&external)?;
    for ((id0, rank0), (id1, rank1)) in in_process.iter().zip(&external) {
        assert_eq!(id0, id1);
        assert!((rank0 - rank1).abs() < 1E-9);
    }
    Ok(())
}

#[test]
fn test_errors() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pages = write_pages(dir.path())?;
    let output = dir.path().join("ranks.txt");
    assert!(run(&pages, &output, &["--alpha", "1"]).is_err());
    assert!(run(&pages, &output, &["--max-iter", "1", "--tolerance", "1e-12"]).is_err());

    let broken = dir.path().join("broken.tsv");
    std::fs::write(&broken, "home\tnowhere\n")?;
    let err = run(&broken, &output, &[]).err();
    assert!(
        err.as_ref()
            .and_then(|e| e.downcast_ref::<PageRankError>())
            .is_some_and(|e| matches!(e, PageRankError::UnknownLink { .. }))
    );

    assert!(run(&dir.path().join("missing.tsv"), &output, &[]).is_err());
    Ok(())
}
