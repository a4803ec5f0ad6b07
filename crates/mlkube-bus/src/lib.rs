//! Topic-based event dispatch for mlkube.
//!
//! A [`Dispatcher`] owns one [`Transport`] and a table of [`Handler`]s keyed
//! by [`Topic`]. It receives events from the transport forever and fans each
//! one out to every handler registered for its topic:
//!
//! - the first handler registered for a topic triggers one transport-level
//!   subscribe
//! - a handler that fails (or panics) is logged and skipped; the remaining
//!   handlers still see the event and the loop keeps running
//! - events returned by handlers are published once the fan-out completes
//!
//! # Architecture
//!
//! ```text
//!   Redis / in-memory ──receive──▶ Dispatcher ──handle──▶ Handler A
//!          ▲                           │      └─handle──▶ Handler B
//!          └────────── publish ────────┘ (outgoing events)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mlkube_bus::{Dispatcher, Event, Handler, HandlerResult, InMemoryTransport, Topic};
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl Handler for Printer {
//!     fn name(&self) -> &str {
//!         "printer"
//!     }
//!
//!     fn topics(&self) -> Vec<Topic> {
//!         vec![Topic::new("model_created")]
//!     }
//!
//!     async fn handle(&self, event: &Event) -> HandlerResult {
//!         println!("{}: {}", event.topic, event.payload);
//!         Ok(Vec::new())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut dispatcher = Dispatcher::new(InMemoryTransport::new());
//! dispatcher.register(Arc::new(Printer)).await?;
//! dispatcher.run().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod memory;
pub mod redis;
pub mod topic;
pub mod transport;

pub use dispatcher::{DispatchReport, Dispatcher, StopHandle};
pub use error::{BusError, HandlerError, Result};
pub use handler::{Handler, HandlerResult};
pub use memory::{InMemoryPublisher, InMemoryTransport};
pub use redis::RedisTransport;
pub use topic::{Event, Topic};
pub use transport::{Delivery, Transport};
