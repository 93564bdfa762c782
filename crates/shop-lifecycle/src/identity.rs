use core::net::{IpAddr, SocketAddr};
use uuid::Uuid;

/// Identity of one running process instance in the registry.
///
/// The `instance_id` is generated once per process start and is the key used
/// to deregister. The port is the one the server set actually bound, never
/// the requested `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub name: String,
    pub instance_id: Uuid,
    pub host: String,
    pub port: u16,
    pub tags: Vec<String>,
}

impl ServiceIdentity {
    pub fn new(
        name: impl Into<String>,
        instance_id: Uuid,
        host: impl Into<String>,
        port: u16,
        tags: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instance_id,
            host: host.into(),
            port,
            tags,
        }
    }

    /// The `host:port` endpoint advertised to the registry. IPv6 literals are
    /// bracketed.
    pub fn endpoint(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_formats_hostnames_and_ip_literals() {
        let id = Uuid::new_v4();
        let v4 = ServiceIdentity::new("inventory-srv", id, "10.1.2.3", 50059, vec![]);
        assert_eq!(v4.endpoint(), "10.1.2.3:50059");

        let v6 = ServiceIdentity::new("inventory-srv", id, "::1", 50059, vec![]);
        assert_eq!(v6.endpoint(), "[::1]:50059");

        let dns = ServiceIdentity::new("inventory-srv", id, "inventory.internal", 50059, vec![]);
        assert_eq!(dns.endpoint(), "inventory.internal:50059");
    }
}
