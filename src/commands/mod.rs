//! Command-line surface: configuration, rule lookup and the extract/batch commands

pub mod config;
pub mod extract;
pub mod rules;
