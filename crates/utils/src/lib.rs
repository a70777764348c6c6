//! Shared error types for every murk pipeline stage.

/// Error enums, one per stage.
pub mod errors;
