//! Runtime configuration read from the process environment.

pub mod env;

pub use env::*;
