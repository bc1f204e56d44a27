//! CLI subcommands

pub mod config;
pub mod env;
pub mod gateway;
pub mod launch;
pub mod obfuscate;
pub mod simulate;
pub mod synthetic;
pub mod track;
