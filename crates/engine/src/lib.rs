// SPDX-License-Identifier: Apache-2.0

//! Pipeline engine: routing, stage policy and pipeline compilation.
//!
//! The [`runner::Runner`] is the data plane: it routes frames from the source
//! through the ordered transformer chain into the sinks and broadcasts
//! acknowledgements back upstream. The [`compiler`] turns a declarative
//! pipeline description into a wired runner using the source and sink
//! registries populated at process start-up.

pub mod compiler;
pub mod error;
pub mod runner;

pub use compiler::compile;
pub use error::Error;
pub use runner::{AckBroadcast, AckFn, Runner, Stage};
