//! Testing utilities and mock implementations
//!
//! Lets the Bayeux client be exercised end to end without a real server.

pub mod mocks;

pub use mocks::*;
