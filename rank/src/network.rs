/*
 * SPDX-FileCopyrightText: 2026 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Networks of pages identified by their content.
//!
//! A [`Network`] is an ordered sequence of [`Page`]s, each with a content
//! and a set of links to other pages, together with the [`IdGenerator`]
//! that maps contents to [`PageId`]s. Links are expressed by identifier, so
//! a link to a page is the identifier of the content of the page.
//!
//! The identifier of a page is not known when the page is created: it is
//! [generated](Page::generate_id) at most once, usually by the initialization
//! phase of a [`PageRank`](crate::rank::PageRank) computation, and then
//! stored in the page.

use crate::ids::{IdError, IdGenerator};
use std::fmt::{self, Display};
use std::sync::{Arc, OnceLock};

/// The identifier of a page.
///
/// Identifiers are opaque strings that are cheap to clone.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(Arc<str>);

impl PageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PageId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl From<&str> for PageId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl AsRef<str> for PageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A page: a content, a set of links, and a lazily assigned identifier.
#[derive(Debug)]
pub struct Page {
    content: Box<[u8]>,
    links: Box<[PageId]>,
    id: OnceLock<PageId>,
}

impl Page {
    /// Creates a page with the given content and links.
    ///
    /// Links form a set: duplicates are removed, and their order is not
    /// preserved.
    pub fn new(content: impl Into<Vec<u8>>, links: impl IntoIterator<Item = PageId>) -> Self {
        let mut links: Vec<PageId> = links.into_iter().collect();
        links.sort_unstable();
        links.dedup();
        Self {
            content: content.into().into_boxed_slice(),
            links: links.into_boxed_slice(),
            id: OnceLock::new(),
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Returns the identifiers of the pages this page links to.
    pub fn links(&self) -> &[PageId] {
        &self.links
    }

    /// Returns whether the page has no links.
    pub fn is_dangling(&self) -> bool {
        self.links.is_empty()
    }

    /// Returns the identifier of the page, if it has already been generated.
    pub fn id(&self) -> Option<&PageId> {
        self.id.get()
    }

    /// Returns the identifier of the page, generating it with `generator` if
    /// this is the first request.
    ///
    /// The generator is invoked at most once per page, unless it fails, in
    /// which case the error is returned and nothing is stored. If several
    /// threads race on the same page, they might all invoke the generator,
    /// but only one identifier will be stored.
    pub fn generate_id(&self, generator: &(impl IdGenerator + ?Sized)) -> Result<&PageId, IdError> {
        if let Some(id) = self.id.get() {
            return Ok(id);
        }
        let id = generator.generate_id(&self.content)?;
        Ok(self.id.get_or_init(|| id))
    }
}

/// A network of pages.
///
/// Pages are enumerated in a fixed order by [`pages`](Network::pages), which
/// must return exactly [`num_pages`](Network::num_pages) pages. The order is
/// the order of the results of a computation.
pub trait Network: Sync {
    /// The generator of page identifiers of this network.
    type Generator: IdGenerator;

    /// The iterator over the pages of this network.
    type Pages<'a>: Iterator<Item = &'a Page> + Send
    where
        Self: 'a;

    /// Returns the number of pages.
    fn num_pages(&self) -> usize;

    /// Returns an iterator over the pages.
    fn pages(&self) -> Self::Pages<'_>;

    /// Returns the generator used to assign identifiers to pages.
    fn generator(&self) -> &Self::Generator;
}

/// A [`Network`] backed by a vector of pages.
///
/// # Examples
///
/// ```
/// use webrank::prelude::*;
///
/// # fn main() -> Result<(), IdError> {
/// let mut network = VecNetwork::new(Sha256IdGenerator);
/// network.add_page("home", ["about", "blog"])?;
/// network.add_page("about", ["home"])?;
/// network.add_page("blog", Vec::<&str>::new())?;
///
/// assert_eq!(network.num_pages(), 3);
/// assert_eq!(network.pages().filter(|p| p.is_dangling()).count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct VecNetwork<G> {
    pages: Vec<Page>,
    generator: G,
}

impl<G: IdGenerator> VecNetwork<G> {
    /// Creates an empty network using the given identifier generator.
    pub fn new(generator: G) -> Self {
        Self {
            pages: Vec::new(),
            generator,
        }
    }

    /// Appends a page to the network, returning a reference to it.
    pub fn push(&mut self, page: Page) -> &Page {
        let index = self.pages.len();
        self.pages.push(page);
        &self.pages[index]
    }

    /// Appends a page, describing its links by the content of their targets.
    ///
    /// The identifiers of the targets are computed using the generator of
    /// the network.
    pub fn add_page<C: AsRef<[u8]>>(
        &mut self,
        content: impl Into<Vec<u8>>,
        link_contents: impl IntoIterator<Item = C>,
    ) -> Result<&Page, IdError> {
        let links = link_contents
            .into_iter()
            .map(|target| self.generator.generate_id(target.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.push(Page::new(content, links)))
    }

    /// Returns the pages as a slice.
    pub fn as_slice(&self) -> &[Page] {
        &self.pages
    }
}

impl<G: IdGenerator> Network for VecNetwork<G> {
    type Generator = G;
    type Pages<'a>
        = std::slice::Iter<'a, Page>
    where
        Self: 'a;

    fn num_pages(&self) -> usize {
        self.pages.len()
    }

    fn pages(&self) -> Self::Pages<'_> {
        self.pages.iter()
    }

    fn generator(&self) -> &G {
        &self.generator
    }
}
