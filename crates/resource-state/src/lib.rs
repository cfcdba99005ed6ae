//! An in-memory, typed resource store with watches, plus a runtime for
//! reactive controllers that derive resources from other resources.
//!
//! Resources are addressed by `(namespace, type, id)`. Every mutation bumps
//! the resource [`Version`] and is broadcast to the watches registered for
//! it. Controllers declare their inputs, receive a reconcile trigger on every
//! change to them and write their outputs back into the same [`State`].
//!
//! ```
//! # use resource_state::{Context, Resource, ResourceSpec, State};
//! # use serde::{Deserialize, Serialize};
//! #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
//! struct Hostname {
//!     hostname: String,
//! }
//!
//! impl ResourceSpec for Hostname {
//!     const TYPE: &'static str = "HostnameStatuses.net";
//!     const NAMESPACE: &'static str = "network";
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let ctx = Context::new();
//! let state = State::new();
//!
//! state
//!     .create(&ctx, Resource::new("hostname", Hostname { hostname: "node-1".into() }))
//!     .await?;
//!
//! let current = state.get::<Hostname>(&ctx, "hostname").await?;
//! assert_eq!(current.spec().hostname, "node-1");
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod backoff;
mod controller;
mod error;
mod event;
mod metadata;
mod resource;
mod runtime;
mod store;

pub use controller::{Controller, ControllerRuntime, Input, InputKind, Output};
pub use error::{Error, Result};
pub use event::{Event, EventQueue, EventType};
pub use metadata::{Kind, Metadata, Phase, Pointer, Selector, Version};
pub use resource::{RawResource, Resource, ResourceSpec};
pub use runtime::{RunningRuntime, Runtime};
pub use store::State;

/// Cancellation context threaded through every long-running call.
///
/// Cancelling a context makes every pending store call return
/// [`Error::Cancelled`] and stops controllers started with it.
pub type Context = tokio_util::sync::CancellationToken;
