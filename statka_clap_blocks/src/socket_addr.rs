//! Config for the address the HTTP server binds to.
use std::{
    net::{TcpListener, ToSocketAddrs},
    ops::Deref,
    str::FromStr,
};

#[derive(Debug, thiserror::Error)]
pub enum BindAddrError {
    #[error("cannot parse socket address '{addr}': {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("found no addresses for '{0}'")]
    NoAddresses(String),
}

/// A socket address given as `host:port`, where `host` may be a name to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindAddr(std::net::SocketAddr);

impl BindAddr {
    /// Bind a non-blocking TCP listener on this address
    pub fn bind(&self) -> std::io::Result<TcpListener> {
        let listener = TcpListener::bind(self.0)?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }
}

impl Deref for BindAddr {
    type Target = std::net::SocketAddr;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for BindAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BindAddr {
    type Err = BindAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.to_socket_addrs()
            .map_err(|source| BindAddrError::Resolve {
                addr: s.to_string(),
                source,
            })?
            .next()
            .map(Self)
            .ok_or_else(|| BindAddrError::NoAddresses(s.to_string()))
    }
}

impl From<BindAddr> for std::net::SocketAddr {
    fn from(addr: BindAddr) -> Self {
        addr.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_bind_addr() {
        let addr: std::net::SocketAddr = "0.0.0.0:8080".parse::<BindAddr>().unwrap().into();
        assert_eq!(addr, std::net::SocketAddr::from(([0, 0, 0, 0], 8080)));

        // resolves to either the v4 or v6 loopback depending on the host
        let addr = "localhost:8080".parse::<BindAddr>().unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 8080);

        assert!(matches!(
            "not an address".parse::<BindAddr>(),
            Err(BindAddrError::Resolve { .. })
        ));
    }

    #[test]
    fn bind_ephemeral_port() {
        let listener = "127.0.0.1:0".parse::<BindAddr>().unwrap().bind().unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
