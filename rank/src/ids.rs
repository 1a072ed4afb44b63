/*
 * SPDX-FileCopyrightText: 2026 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Content-derived page identifiers.
//!
//! An [`IdGenerator`] turns the content of a page into a stable
//! [`PageId`]: the same content always yields the same identifier. Two
//! implementations are provided, both computing a SHA-256 digest written as
//! [`DIGEST_HEX_LEN`] lowercase hexadecimal digits:
//!
//! - [`Sha256IdGenerator`] computes the digest in process;
//! - [`ProcessIdGenerator`] streams the content to an external program (by
//!   default, `sha256sum`) and reads the digest from its output.
//!
//! The two generators return the same identifiers, so they can be used
//! interchangeably on the same network.

use crate::network::PageId;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;

/// The number of hexadecimal digits of a SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Errors raised while computing an identifier.
#[derive(Error, Debug)]
pub enum IdError {
    /// The external program could not be started.
    #[error("Could not start {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// Streaming the content to the external program, or reading back its
    /// output, failed.
    #[error("I/O error while communicating with {program:?}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The external program terminated unsuccessfully.
    #[error("{program:?} terminated with {status}")]
    Status { program: String, status: ExitStatus },
    /// The external program did not print a digest.
    #[error("{program:?} returned a malformed digest: {output:?}")]
    Malformed { program: String, output: String },
}

impl IdError {
    /// Returns whether the error might not happen again on a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, IdError::Spawn { .. } | IdError::Io { .. })
    }
}

/// A deterministic map from page contents to page identifiers.
///
/// Implementations are called concurrently from several threads, one call per
/// page, and calls must be independent of one another.
pub trait IdGenerator: Sync {
    /// Returns the identifier of a page with the given content.
    fn generate_id(&self, content: &[u8]) -> Result<PageId, IdError>;
}

impl<G: IdGenerator + ?Sized> IdGenerator for &G {
    fn generate_id(&self, content: &[u8]) -> Result<PageId, IdError> {
        (**self).generate_id(content)
    }
}

/// Computes identifiers as in-process SHA-256 digests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256IdGenerator;

impl IdGenerator for Sha256IdGenerator {
    fn generate_id(&self, content: &[u8]) -> Result<PageId, IdError> {
        Ok(PageId::from(format!("{:x}", Sha256::digest(content))))
    }
}

/// Computes identifiers by running an external hashing program.
///
/// For each page, the program is started with its standard input and output
/// redirected to pipes; the content of the page is written to its standard
/// input, which is then closed, and the first [`DIGEST_HEX_LEN`] characters of
/// its standard output, which must be hexadecimal digits, are the identifier.
/// The content is written while the output is being read, so the program
/// may start writing before it has consumed its whole input.
///
/// Starting a process for each page is expensive, but happens only once per
/// page, during the initialization of the computation. Failures to start the
/// program or to talk to it can be [retried](Self::retries).
#[derive(Debug, Clone)]
pub struct ProcessIdGenerator {
    program: String,
    args: Vec<String>,
    retries: usize,
}

impl Default for ProcessIdGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PROGRAM)
    }
}

impl ProcessIdGenerator {
    pub const DEFAULT_PROGRAM: &'static str = "sha256sum";

    /// Creates a generator running `program` (looked up in the `PATH`).
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            retries: 0,
        }
    }

    /// Adds an argument passed to the program.
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Sets how many times a [transient](IdError::is_transient) failure is
    /// retried before giving up (default: 0).
    pub fn retries(&mut self, retries: usize) -> &mut Self {
        self.retries = retries;
        self
    }

    /// Returns the program run by this generator.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn run(&self, content: &[u8]) -> Result<PageId, IdError> {
        let io_error = |source| IdError::Io {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| IdError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // The content is written by a helper thread while we read the output,
        // so programs writing before the end of their input cannot block us.
        // Dropping the handle closes the pipe, signaling the end of the input.
        let stdin = child.stdin.take();
        let (output, written) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(content),
                None => Ok(()),
            });
            // Always reap the child, even if writing fails
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("writer thread panicked")));
            (output, written)
        });
        let output = output.map_err(io_error)?;
        written.map_err(io_error)?;

        if !output.status.success() {
            return Err(IdError::Status {
                program: self.program.clone(),
                status: output.status,
            });
        }

        let stdout = &output.stdout;
        let well_formed = stdout.len() >= DIGEST_HEX_LEN
            && stdout[..DIGEST_HEX_LEN].iter().all(u8::is_ascii_hexdigit)
            && stdout
                .get(DIGEST_HEX_LEN)
                .is_none_or(|c| c.is_ascii_whitespace());
        if !well_formed {
            let mut output = String::from_utf8_lossy(stdout).into_owned();
            output.truncate(2 * DIGEST_HEX_LEN);
            return Err(IdError::Malformed {
                program: self.program.clone(),
                output,
            });
        }

        let digest = String::from_utf8_lossy(&stdout[..DIGEST_HEX_LEN]).to_ascii_lowercase();
        Ok(PageId::from(digest))
    }
}

impl IdGenerator for ProcessIdGenerator {
    fn generate_id(&self, content: &[u8]) -> Result<PageId, IdError> {
        let mut attempt = 0;
        loop {
            match self.run(content) {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    log::warn!("{e}; retrying ({attempt}/{})", self.retries);
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ABC_DIGEST: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn has_sha256sum() -> bool {
        Command::new(ProcessIdGenerator::DEFAULT_PROGRAM)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    #[test]
    fn test_sha256() -> Result<(), IdError> {
        let id = Sha256IdGenerator.generate_id(b"abc")?;
        assert_eq!(id.as_str(), ABC_DIGEST);
        assert_eq!(id.as_str().len(), DIGEST_HEX_LEN);
        assert_eq!(id, Sha256IdGenerator.generate_id(b"abc")?);
        assert_ne!(id, Sha256IdGenerator.generate_id(b"abd")?);
        Ok(())
    }

    #[test]
    fn test_process_matches_in_process() -> Result<(), IdError> {
        if !has_sha256sum() {
            eprintln!("sha256sum is not available: skipping");
            return Ok(());
        }
        let generator = ProcessIdGenerator::default();
        let large = vec![b'x'; 100_000];
        let contents: [&[u8]; 4] = [b"", b"abc", b"\n\0\xff", &large];
        for content in contents {
            assert_eq!(
                generator.generate_id(content)?,
                Sha256IdGenerator.generate_id(content)?
            );
        }
        Ok(())
    }

    #[test]
    fn test_missing_program() {
        let mut generator = ProcessIdGenerator::new("/nonexistent/webrank-hasher");
        generator.retries(2);
        let err = generator.generate_id(b"abc").unwrap_err();
        assert!(matches!(err, IdError::Spawn { .. }), "{err:?}");
        assert!(err.is_transient());
    }

    #[test]
    fn test_program_echoing_large_input() -> Result<(), IdError> {
        // cat writes while still reading, so the output pipe fills up before
        // the input has been written completely
        let generator = ProcessIdGenerator::new("cat");
        let mut content = ABC_DIGEST.as_bytes().to_vec();
        content.push(b'\n');
        content.extend(std::iter::repeat_n(b'x', 1 << 20));
        match generator.generate_id(&content) {
            Ok(id) => assert_eq!(id.as_str(), ABC_DIGEST),
            Err(IdError::Spawn { .. }) => eprintln!("cat is not available: skipping"),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    #[test]
    fn test_malformed_output() {
        let mut generator = ProcessIdGenerator::new("echo");
        generator.arg("not a digest");
        match generator.generate_id(b"abc") {
            // The write may fail if echo exits before reading its input
            Err(IdError::Malformed { output, .. }) => assert_eq!(output, "not a digest\n"),
            Err(IdError::Io { .. }) | Err(IdError::Spawn { .. }) => {}
            other => panic!("Unexpected result {other:?}"),
        }
    }
}
