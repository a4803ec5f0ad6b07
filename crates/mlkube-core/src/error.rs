//! Common error types for mlkube.
//!
//! This module provides shared error types that are used across multiple crates.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the mlkube system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A name could not be turned into a cluster resource name.
    #[error("invalid name: {0}")]
    InvalidName(#[from] crate::name::NameError),

    /// A required environment variable is not set.
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),
}
