use crate::error::ReporterError;
use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    sync::Arc,
};

/// Sends one payload as one datagram.
pub trait Transport: Send + Sync {
    /// # Errors
    /// Returns the underlying IO error if the datagram couldn't be handed to the network.
    fn send(&self, payload: &[u8]) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, payload: &[u8]) -> io::Result<()> {
        (**self).send(payload)
    }
}

/// A UDP client socket connected to a fixed remote address.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Resolves `addr` and opens a socket connected to it. IPv4 targets are preferred.
    ///
    /// # Errors
    /// Returns [`ReporterError::AddressResolution`] if `addr` doesn't resolve, and
    /// [`ReporterError::Socket`] if the socket can't be bound or connected.
    pub fn connect(addr: &str) -> Result<Self, ReporterError> {
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| ReporterError::AddressResolution(format!("{addr}: {e}")))?
            .collect();
        let peer = candidates
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| ReporterError::AddressResolution(addr.to_string()))?;

        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;

        Ok(Self {
            socket: Some(socket),
            peer,
        })
    }

    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Drops the socket. Every later send fails with [`io::ErrorKind::NotConnected`].
    pub fn close(&mut self) {
        self.socket = None;
    }
}

impl Transport for UdpTransport {
    fn send(&self, payload: &[u8]) -> io::Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "udp transport is closed"))?;
        socket.send(payload).map(|_| ())
    }
}
