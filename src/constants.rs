// -
// Key namespaces

/// Namespace under which lock nodes are materialized
pub(crate) const LOCK_NAMESPACE: &str = "/locks";

// -
// Channel capacities

/// Stop and error channels only ever carry a single message
pub(crate) const SIGNAL_CHANNEL_CAPACITY: usize = 1;
