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

pub mod ids;
pub mod network;
pub mod rank;

#[macro_use]
pub mod utils;

pub mod prelude {
    pub use crate::ids::*;
    pub use crate::network::*;
    pub use crate::rank::pagerank::preds;
    pub use crate::rank::*;
}
