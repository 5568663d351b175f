use std::net::Ipv4Addr;
use if_addrs::get_if_addrs;

pub const UNKNOWN_HOSTNAME: &str = "Unknown";

const VIRTUAL_INTERFACE_PREFIXES: [&str; 4] = ["docker", "br-", "veth", "virbr"];

/// Non-loopback IPv4 addresses of physical-looking interfaces, in OS order.
pub fn local_ipv4_addrs() -> std::io::Result<Vec<Ipv4Addr>> {
    Ok(get_if_addrs()?
        .into_iter()
        .filter(|iface| !iface.is_loopback() && !is_virtual_interface(&iface.name))
        .filter_map(|iface| match iface.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .collect())
}

pub fn is_virtual_interface(name: &str) -> bool {
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

pub fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| UNKNOWN_HOSTNAME.to_string())
}
