//! CLI subcommands

pub mod forecast;
pub mod models;
