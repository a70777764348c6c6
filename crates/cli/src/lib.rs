//! Command-line front end for the murk source obfuscator.

/// Subcommand definitions.
pub mod commands;
