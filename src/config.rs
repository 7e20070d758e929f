use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// All interfaces, port 12345. IPv4 only.
pub const DEFAULT_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 12345);

/// How often each client gets a new proverb.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(3);

/// A client sends this byte to end its own session.
pub const QUIT_BYTE: u8 = b'q';

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddrV4,
    pub period: Duration,
    pub quit_byte: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR,
            period: DEFAULT_PERIOD,
            quit_byte: QUIT_BYTE,
        }
    }
}

impl ServerConfig {
    pub fn with_addr(mut self, addr: SocketAddrV4) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}
