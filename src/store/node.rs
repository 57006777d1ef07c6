use serde::Deserialize;
use serde::Serialize;

use crate::backend::RawNode;

/// A node in the store's directory tree.
///
/// A node is either a leaf carrying an opaque value or a directory whose
/// children are populated by a recursive listing. The two are mutually
/// exclusive on every path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreNode {
    /// Absolute, slash-delimited path
    pub key: String,

    /// Opaque payload; empty for directories
    pub value: Vec<u8>,

    /// Whether this node is a directory
    pub dir: bool,

    /// Seconds until expiry; 0 means no expiry
    pub ttl: u64,

    /// Backend version of the node at read time.
    ///
    /// Informational only: two nodes that differ solely in `index` still
    /// compare equal.
    pub index: u64,

    /// `None` for leaves. Directories listed recursively carry
    /// `Some(children)`, which is empty for a directory with no children.
    pub child_nodes: Option<Vec<StoreNode>>,
}

impl StoreNode {
    /// Leaf node with no expiry.
    pub fn leaf(
        key: impl Into<String>,
        value: impl AsRef<[u8]>,
    ) -> Self {
        StoreNode {
            key: key.into(),
            value: value.as_ref().to_vec(),
            ..Default::default()
        }
    }

    /// Directory node.
    pub fn dir(key: impl Into<String>) -> Self {
        StoreNode {
            key: key.into(),
            dir: true,
            ..Default::default()
        }
    }

    /// Sets the expiry, in seconds.
    pub fn with_ttl(
        mut self,
        ttl: u64,
    ) -> Self {
        self.ttl = ttl;
        self
    }
}

// `index` is a read-time artifact of the backend, not part of the node's
// identity, so it stays out of the equality contract.
impl PartialEq for StoreNode {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.key == other.key
            && self.value == other.value
            && self.dir == other.dir
            && self.ttl == other.ttl
            && self.child_nodes == other.child_nodes
    }
}

impl Eq for StoreNode {}

impl From<RawNode> for StoreNode {
    fn from(raw: RawNode) -> Self {
        let child_nodes = if raw.dir {
            Some(raw.nodes.into_iter().map(StoreNode::from).collect())
        } else {
            None
        };
        StoreNode {
            key: raw.key,
            value: raw.value,
            dir: raw.dir,
            ttl: raw.ttl,
            index: raw.modified_index,
            child_nodes,
        }
    }
}
