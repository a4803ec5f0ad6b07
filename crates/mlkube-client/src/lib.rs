//! Client-side discovery and failover for mlkube model services.
//!
//! A [`ResilientInvoker`] addresses one logical model service
//! (`{model}-{version}`). It keeps its own cache of endpoints, fills it from a
//! [`Resolver`] when empty, and routes each call around endpoints that refuse
//! connections:
//!
//! - a connection-level failure evicts the endpoint and the next one is tried
//! - a reachable endpoint answering with a non-success status is final; the
//!   request is never replayed elsewhere
//! - the cache is refreshed only when a call starts with it empty
//!
//! # Example
//!
//! ```no_run
//! use mlkube_client::{Endpoint, ResilientInvoker, StaticResolver, TabularBody};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = StaticResolver::new([Endpoint::new("10.0.0.7", 30080)]);
//! let mut invoker = ResilientInvoker::new("iris-rf-1", resolver)?;
//!
//! let input = TabularBody::new(
//!     vec!["sepal_length".into(), "sepal_width".into()],
//!     vec![vec![json!(5.1), json!(3.5)]],
//! );
//! let output = invoker.invoke(&input).await?;
//! println!("{:?}", output.data);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod endpoint;
pub mod error;
pub mod frame;
pub mod invoker;
pub mod resolver;

pub use endpoint::Endpoint;
pub use error::{ClientError, ResolveError, Result};
pub use frame::TabularBody;
pub use invoker::{InvokerConfig, ResilientInvoker};
pub use resolver::{cartesian, Resolver, StaticResolver};
