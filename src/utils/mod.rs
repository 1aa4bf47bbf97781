//! Utility functions and helpers for the Strata CLI.

/// Running the CLI
pub mod cli;
