// crates/monitor/src/lib.rs
//! `fedwatch` command-line monitor: log in, then follow the live stream.

pub mod cli;
pub mod fl;
pub mod report;
