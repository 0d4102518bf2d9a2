//! Crash scenarios, one module per write path

pub mod append;
pub mod commit;
pub mod migration;
