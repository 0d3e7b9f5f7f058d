//! Host facts and source identity

use std::net::{Ipv4Addr, UdpSocket};
#[cfg(all(unix, feature = "nix"))]
use tracing::debug;

use crate::config::AgentSection;
use crate::remote::proto::{KeyValue, SourceIdentity};

/// Static properties of the host this agent runs on
pub trait HostFacts: Send + Sync {
    /// Key/value facts appended to the instance properties snapshot
    fn properties(&self) -> Vec<KeyValue>;

    /// Address used to derive a generated instance name
    fn primary_ipv4(&self) -> Option<Ipv4Addr>;
}

/// Facts gathered from the running system
#[derive(Debug, Clone)]
pub struct SystemHostFacts {
    ipv4_list_size: usize,
}

impl SystemHostFacts {
    pub fn new(ipv4_list_size: usize) -> Self {
        Self { ipv4_list_size }
    }

    #[cfg(feature = "sysinfo")]
    fn os_name() -> String {
        sysinfo::System::long_os_version()
            .or_else(sysinfo::System::name)
            .unwrap_or_else(|| std::env::consts::OS.to_string())
    }

    #[cfg(not(feature = "sysinfo"))]
    fn os_name() -> String {
        std::env::consts::OS.to_string()
    }

    /// Up to `ipv4_list_size` local addresses, the routed one first
    pub fn ipv4_list(&self) -> Vec<Ipv4Addr> {
        ipv4_list(self.primary_ipv4(), interface_ipv4s(), self.ipv4_list_size)
    }

    #[cfg(feature = "sysinfo")]
    fn host_name() -> Option<String> {
        sysinfo::System::host_name()
    }

    #[cfg(not(feature = "sysinfo"))]
    fn host_name() -> Option<String> {
        std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty())
    }
}

impl Default for SystemHostFacts {
    fn default() -> Self {
        Self::new(10)
    }
}

impl HostFacts for SystemHostFacts {
    fn properties(&self) -> Vec<KeyValue> {
        let mut props = vec![KeyValue::new("os_name", Self::os_name())];
        if let Some(host) = Self::host_name() {
            props.push(KeyValue::new("hostname", host));
        }
        props.extend(
            self.ipv4_list()
                .into_iter()
                .map(|ip| KeyValue::new("ipv4", ip.to_string())),
        );
        props.push(KeyValue::new("process_no", std::process::id().to_string()));
        props.push(KeyValue::new("language", "rust"));
        props
    }

    fn primary_ipv4(&self) -> Option<Ipv4Addr> {
        // connect() on UDP only picks a route; nothing is sent
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
        match socket.local_addr().ok()?.ip() {
            std::net::IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }
}

fn ipv4_list(primary: Option<Ipv4Addr>, interfaces: Vec<Ipv4Addr>, limit: usize) -> Vec<Ipv4Addr> {
    let mut list: Vec<Ipv4Addr> = Vec::new();
    for ip in primary.into_iter().chain(interfaces) {
        if list.len() >= limit {
            break;
        }
        if !ip.is_loopback() && !ip.is_unspecified() && !list.contains(&ip) {
            list.push(ip);
        }
    }
    list
}

/// IPv4 addresses of the non-loopback interfaces
#[cfg(all(unix, feature = "nix"))]
fn interface_ipv4s() -> Vec<Ipv4Addr> {
    use nix::net::if_::InterfaceFlags;
    use std::net::SocketAddrV4;

    match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs
            .filter(|ifa| !ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK))
            .filter_map(|ifa| {
                ifa.address
                    .as_ref()
                    .and_then(|addr| addr.as_sockaddr_in())
                    .map(|sin| *SocketAddrV4::from(*sin).ip())
            })
            .collect(),
        Err(e) => {
            debug!("Failed to list network interfaces: {}", e);
            Vec::new()
        }
    }
}

#[cfg(not(all(unix, feature = "nix")))]
fn interface_ipv4s() -> Vec<Ipv4Addr> {
    Vec::new()
}

impl SourceIdentity {
    /// Identity from config; an empty instance name becomes `<uuid>@<ipv4>`
    pub fn resolve(agent: &AgentSection, facts: &dyn HostFacts) -> Self {
        let service_instance = match agent.instance_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let ip = facts
                    .primary_ipv4()
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| Ipv4Addr::LOCALHOST.to_string());
                format!("{}@{}", uuid::Uuid::new_v4().simple(), ip)
            }
        };
        Self {
            service: agent.service_name.clone(),
            service_instance,
        }
    }
}
