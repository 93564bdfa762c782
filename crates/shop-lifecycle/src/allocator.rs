//! Free port discovery for processes started without an explicit port.
//!
//! The allocator binds an ephemeral port, reads the number the kernel chose
//! and releases the socket immediately. No reservation is held: another
//! process may take the port before the server set binds it, in which case
//! startup fails with a [`BindError`](crate::BindError) and is not retried.

use crate::AllocationError;
use core::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::net::TcpListener;

/// Source of free local ports.
pub trait PortAllocator: Send + Sync {
    /// Returns a port that was free at the time of the call.
    fn allocate(&self) -> Result<u16, AllocationError>;
}

/// Allocates ports from the operating system's ephemeral range.
#[derive(Debug, Clone, Copy)]
pub struct EphemeralPortAllocator {
    ip: IpAddr,
}

impl EphemeralPortAllocator {
    /// Probes on the given interface address.
    pub const fn new(ip: IpAddr) -> Self {
        Self { ip }
    }
}

impl Default for EphemeralPortAllocator {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl PortAllocator for EphemeralPortAllocator {
    fn allocate(&self) -> Result<u16, AllocationError> {
        let listener = TcpListener::bind(SocketAddr::new(self.ip, 0))?;
        let port = listener.local_addr()?.port();
        drop(listener);
        tracing::debug!(port, "Allocated ephemeral port");
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_port_is_nonzero_and_bindable() {
        let allocator = EphemeralPortAllocator::default();
        let port = allocator.allocate().unwrap();
        assert_ne!(port, 0);

        // Released immediately, so binding it again succeeds.
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[test]
    fn unbindable_interface_is_an_allocation_error() {
        // TEST-NET-1 is never assigned to a local interface.
        let allocator = EphemeralPortAllocator::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        assert!(allocator.allocate().is_err());
    }
}
