use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const HUB_PORT: &str = "GPU_HUB_PORT";

const DEFAULT_PORT: u16 = 1312;

pub fn get_port() -> u16 {
    let port_from_env = std::env::var(HUB_PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const HUB_ADDR: &str = "GPU_HUB_ADDR";

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub fn get_addr() -> IpAddr {
    let addr_from_env = std::env::var(HUB_ADDR);
    addr_from_env.map_or(IpAddr::V4(DEFAULT_ADDR), |res| {
        res.parse().unwrap_or(IpAddr::V4(DEFAULT_ADDR))
    })
}

pub fn get_bind_addr() -> SocketAddr {
    SocketAddr::new(get_addr(), get_port())
}

const NODE_NAME: &str = "GPU_HUB_NODE_NAME";

/// Node name from the environment, falling back to the host name.
pub fn get_node_name() -> String {
    std::env::var(NODE_NAME)
        .ok()
        .or_else(sysinfo::System::host_name)
        .unwrap_or_else(|| String::from("localhost"))
}
