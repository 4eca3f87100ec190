//! Shared helpers for unit tests
//!
//! Throwaway chains in temporary directories, mined at a low difficulty.

pub mod test_utils;

pub use test_utils::*;
