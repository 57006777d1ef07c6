//! Node Tree Model
//!
//! The caller-facing shape of store data:
//! - [`StoreNode`] - a leaf or directory in the hierarchical key space
//! - [`WatchEvent`] / [`WatchEventType`] - classified change notifications
//!
//! Both are built from the raw payloads reported across the
//! [`StoreBackend`](crate::StoreBackend) boundary.

mod event;
mod node;

pub use event::*;
pub use node::*;
