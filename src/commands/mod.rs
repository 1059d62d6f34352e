//! Subcommands of the `orc` binary.

pub mod ask;
pub mod config;
