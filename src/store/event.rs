use crate::backend::RawAction;
use crate::backend::RawEvent;
use crate::BackendError;
use crate::StoreError;
use crate::StoreNode;

/// Kind of change a watch observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventType {
    Create,
    Update,
    Delete,
    Expire,
}

impl WatchEventType {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEventType::Create => "create",
            WatchEventType::Update => "update",
            WatchEventType::Delete => "delete",
            WatchEventType::Expire => "expire",
        }
    }
}

/// One classified change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub event_type: WatchEventType,

    /// The node the event is about. For [`WatchEventType::Delete`] and
    /// [`WatchEventType::Expire`] this carries the removed node's last
    /// value, since the backend strips the value from removal payloads.
    pub node: StoreNode,

    /// The node's prior state, when the backend reported one.
    pub prev_node: Option<StoreNode>,
}

/// Classification of the raw action vocabulary.
///
/// Total over [`RawAction`]: a conditional write reads as an update when the
/// backend reports a prior state and as a create otherwise, and both removal
/// flavors collapse onto their caller-visible kind.
impl TryFrom<RawEvent> for WatchEvent {
    type Error = StoreError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let event_type = match raw.action {
            RawAction::Create => WatchEventType::Create,
            RawAction::Set if raw.prev_node.is_none() => WatchEventType::Create,
            RawAction::Set | RawAction::Update | RawAction::CompareAndSwap => {
                WatchEventType::Update
            }
            RawAction::Delete | RawAction::CompareAndDelete => WatchEventType::Delete,
            RawAction::Expire => WatchEventType::Expire,
        };

        let RawEvent {
            action,
            index,
            node,
            prev_node,
        } = raw;

        match event_type {
            WatchEventType::Create | WatchEventType::Update => {
                let node = node.ok_or_else(|| malformed(action, index))?;
                Ok(WatchEvent {
                    event_type,
                    node: node.into(),
                    prev_node: prev_node.map(StoreNode::from),
                })
            }
            WatchEventType::Delete | WatchEventType::Expire => {
                // Removal payloads carry the last value in prev_node only.
                let source = prev_node
                    .clone()
                    .or(node)
                    .ok_or_else(|| malformed(action, index))?;
                let mut removed = StoreNode::from(source);
                removed.index = index;
                Ok(WatchEvent {
                    event_type,
                    node: removed,
                    prev_node: prev_node.map(StoreNode::from),
                })
            }
        }
    }
}

fn malformed(
    action: RawAction,
    index: u64,
) -> StoreError {
    StoreError::Backend(BackendError::Raw {
        code: 0,
        message: format!("malformed {action:?} event at index {index}"),
    })
}
