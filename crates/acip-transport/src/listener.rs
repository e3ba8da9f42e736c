//! Dual-stack TCP listener with bounded accept.
//!
//! When both an IPv4 and an IPv6 address are requested (or neither, which
//! binds the unspecified address on both families), two sockets are bound
//! and accepted from together. The IPv6 socket sets `IPV6_V6ONLY` so the
//! two never collide on dual-stack hosts.

use crate::error::{TransportError, TransportResult};
use futures_util::future::select_all;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

fn bind_one(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    TcpListener::from_std(socket.into())
}

/// TCP listener over one or both address families.
pub struct DualStackListener {
    listeners: Vec<TcpListener>,
}

impl DualStackListener {
    /// Bind the requested addresses on `port`.
    ///
    /// With neither address given, binds `0.0.0.0` and `::` both.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any requested bind fails.
    pub fn bind(
        v4: Option<Ipv4Addr>,
        v6: Option<Ipv6Addr>,
        port: u16,
    ) -> std::io::Result<Self> {
        let (v4, v6) = match (v4, v6) {
            (None, None) => (Some(Ipv4Addr::UNSPECIFIED), Some(Ipv6Addr::UNSPECIFIED)),
            other => other,
        };

        let mut listeners = Vec::new();
        if let Some(addr) = v4 {
            listeners.push(bind_one(SocketAddr::new(IpAddr::V4(addr), port))?);
        }
        if let Some(addr) = v6 {
            listeners.push(bind_one(SocketAddr::new(IpAddr::V6(addr), port))?);
        }
        Ok(Self { listeners })
    }

    /// Accept one connection, waiting at most `wait`.
    ///
    /// Returns `Ok(None)` on timeout so the caller can observe shutdown
    /// between accepts.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the accept itself fails.
    pub async fn accept(
        &self,
        wait: Duration,
    ) -> TransportResult<Option<(TcpStream, SocketAddr)>> {
        let accepts = self
            .listeners
            .iter()
            .map(|l| Box::pin(l.accept()))
            .collect::<Vec<_>>();

        match timeout(wait, select_all(accepts)).await {
            Err(_) => Ok(None),
            Ok((Ok(conn), _, _)) => Ok(Some(conn)),
            Ok((Err(e), _, _)) => Err(TransportError::Io(e)),
        }
    }

    /// Local addresses actually bound.
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_timeout_returns_none() {
        let listener =
            DualStackListener::bind(Some(Ipv4Addr::LOCALHOST), None, 0).unwrap();
        let accepted = listener.accept(Duration::from_millis(50)).await.unwrap();
        assert!(accepted.is_none());
    }

    #[tokio::test]
    async fn test_accepts_v4_connection() {
        let listener =
            DualStackListener::bind(Some(Ipv4Addr::LOCALHOST), None, 0).unwrap();
        let addr = listener.local_addrs()[0];

        let (accepted, connected) = tokio::join!(
            listener.accept(Duration::from_secs(2)),
            TcpStream::connect(addr)
        );
        assert!(accepted.unwrap().is_some());
        assert!(connected.is_ok());
    }

    #[tokio::test]
    async fn test_dual_stack_binds_both_families() {
        let listener = DualStackListener::bind(
            Some(Ipv4Addr::LOCALHOST),
            Some(Ipv6Addr::LOCALHOST),
            0,
        );
        // Port 0 gives each family its own ephemeral port; both must bind.
        let listener = listener.unwrap();
        let addrs = listener.local_addrs();
        assert_eq!(addrs.len(), 2);
        assert!(addrs.iter().any(SocketAddr::is_ipv4));
        assert!(addrs.iter().any(SocketAddr::is_ipv6));
    }

    #[tokio::test]
    async fn test_accepts_v6_connection_on_dual_stack() {
        let listener = DualStackListener::bind(
            Some(Ipv4Addr::LOCALHOST),
            Some(Ipv6Addr::LOCALHOST),
            0,
        )
        .unwrap();
        let v6_addr = *listener
            .local_addrs()
            .iter()
            .find(|a| a.is_ipv6())
            .unwrap();

        let (accepted, connected) = tokio::join!(
            listener.accept(Duration::from_secs(2)),
            TcpStream::connect(v6_addr)
        );
        let (_, peer) = accepted.unwrap().unwrap();
        assert!(peer.is_ipv6());
        assert!(connected.is_ok());
    }
}
