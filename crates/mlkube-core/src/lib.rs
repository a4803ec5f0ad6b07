//! Core types and utilities for mlkube.
//!
//! This crate provides the foundational types shared by the mlkube crates:
//!
//! - **Names**: canonicalization of untrusted model names into cluster-legal
//!   resource names
//! - **Registry**: container registry credentials and canonical image references
//! - **Events**: the payload schema of model-lifecycle events
//! - **Error types**: common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use mlkube_core::{canonicalize, CanonicalName};
//!
//! let result = canonicalize("iris_rf-1");
//! assert_eq!(result.name, "irisrf-1");
//! assert!(result.mutated);
//!
//! let name = CanonicalName::parse("iris-rf-1").unwrap();
//! assert_eq!(name.as_str(), "iris-rf-1");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod event;
pub mod name;
pub mod registry;

pub use error::{CoreError, Result};
pub use event::{ModelEvent, ModelInfo};
pub use name::{canonicalize, is_canonical, CanonicalName, Canonicalized, NameError};
pub use registry::{ImageReference, RegistryInfo};
