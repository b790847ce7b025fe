//! Command handlers for the protoshelf CLI.
//!
//! `history` manages recorded versions; the tree commands mutate the demo
//! tree and record a version each.

pub mod history;
pub mod tree;

pub use history::*;
pub use tree::*;
