use tracing::info;

use crate::error::IfaceError;

/// The node's virtual network interface, as far as the allocator needs it.
pub trait NetworkInterface: Send + Sync {
    /// Drop traffic from outside `cidr` (an address with a `/24` suffix).
    ///
    /// Must fail if the filter cannot be installed; a node that cannot gate
    /// its subnet does not start.
    fn block_subnet(&self, cidr: &str) -> Result<(), IfaceError>;
}

/// Interface that only logs. Used when no packet path is attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopInterface;

impl NetworkInterface for NoopInterface {
    fn block_subnet(&self, cidr: &str) -> Result<(), IfaceError> {
        info!(%cidr, "subnet gate requested");
        Ok(())
    }
}
