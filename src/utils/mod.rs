//!
//! Utility module for the mirror.
//!
//! Re-exports amount formatting and hex helpers for use throughout the codebase.
/// Utility functions for formatting and encoding
pub mod index;

pub use index::{format_amount_text, hex_or_empty, join_hex_args};
