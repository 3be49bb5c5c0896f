//! CLI subcommand implementations.

pub mod demo;
pub mod interpreter;
pub mod run;
