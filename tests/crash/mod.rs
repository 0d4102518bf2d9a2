//! Crash testing framework
//!
//! - Crash injection at named points in a child process
//! - Store fixtures shared by the scenarios

pub mod harness;
pub mod scenarios;
pub mod utils;

pub use harness::*;
pub use utils::*;
