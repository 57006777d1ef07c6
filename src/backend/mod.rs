//! Backend boundary
//!
//! Everything the adapter needs from the store is expressed as the
//! [`StoreBackend`] trait plus the raw payload types below. The wire client
//! owning connections, leader discovery, and request retries lives on the
//! other side of this seam; here it is only a contract.

#[cfg(test)]
use mockall::automock;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::BackendResult;

/// Node payload as the backend reports it, before tree reconstruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNode {
    pub key: String,
    pub value: Vec<u8>,
    pub dir: bool,
    /// Remaining seconds until expiry; 0 means none
    pub ttl: u64,
    /// Index of the write that produced this version
    pub modified_index: u64,
    /// Immediate children; empty for leaves and non-recursive listings
    pub nodes: Vec<RawNode>,
}

/// Action vocabulary of the notification feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RawAction {
    Create,
    Set,
    Update,
    CompareAndSwap,
    Delete,
    CompareAndDelete,
    Expire,
}

/// One notification from the backend's change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub action: RawAction,
    /// Store-wide index of the change; strictly increasing
    pub index: u64,
    pub node: Option<RawNode>,
    pub prev_node: Option<RawNode>,
}

/// Request surface of the consensus-backed store.
///
/// All calls resolve with [`BackendError::Unreachable`](crate::BackendError)
/// when the store cannot be reached within the wire client's own deadline.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Reads a single node, without children.
    async fn get(
        &self,
        key: &str,
    ) -> BackendResult<RawNode>;

    /// Reads a directory node together with its children, the whole
    /// subtree when `recursive` is set.
    async fn list_directory(
        &self,
        key: &str,
        recursive: bool,
    ) -> BackendResult<RawNode>;

    /// Atomically creates a leaf, failing when anything occupies the path.
    /// Missing parent directories are created implicitly.
    async fn create_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_secs: u64,
    ) -> BackendResult<RawNode>;

    /// Writes a leaf unconditionally, creating missing parents.
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_secs: u64,
    ) -> BackendResult<RawNode>;

    /// Removes a node; a directory requires `recursive`.
    async fn delete(
        &self,
        key: &str,
        recursive: bool,
    ) -> BackendResult<RawNode>;

    /// The store-wide index at this moment. Doubles as the cheapest
    /// reachability probe the store offers.
    async fn current_index(&self) -> BackendResult<u64>;

    /// Long-polls for the next notification with index greater than
    /// `after_index` whose key is `prefix` or a slash-separated descendant
    /// of it.
    ///
    /// Fails with [`BackendError::EventIndexCleared`](crate::BackendError)
    /// when `after_index` has fallen out of the store's retained history
    /// window.
    async fn watch_next(
        &self,
        prefix: &str,
        after_index: u64,
    ) -> BackendResult<RawEvent>;
}
