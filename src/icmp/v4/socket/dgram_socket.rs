use super::{Received, Socket, SocketConfig, SocketType};
use socket2::{Domain, Protocol, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

/// `SOCK_DGRAM` ICMP transport. The kernel frames outbound messages,
/// rewrites the echo identifier to the socket's own, and only delivers
/// replies to this socket's requests, already stripped of the IP header.
pub struct DgramSocket {
    socket: socket2::Socket,
}

impl DgramSocket {
    pub fn new(config: &SocketConfig) -> Result<DgramSocket, io::Error> {
        tracing::trace!("opening dgram icmp socket");
        let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))?;
        socket.set_read_timeout(Some(config.read_timeout))?;
        socket.set_write_timeout(Some(config.send_timeout))?;
        Ok(DgramSocket { socket })
    }
}

impl Socket for DgramSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> io::Result<usize> {
        self.socket.send_to(buf, &addr.into())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Received> {
        // See RawSocket::recv_from for why this cast is sound.
        let (len, socket_addr) = self.socket.recv_from(unsafe {
            &mut *(std::ptr::addr_of_mut!(*buf) as *mut [std::mem::MaybeUninit<u8>])
        })?;
        let from = socket_addr
            .as_socket_ipv4()
            .map(|addr| *addr.ip())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "peer address is not IPv4"))?;
        // No IP header on a dgram socket, so no arriving TTL to report.
        Ok(Received {
            len,
            from,
            ttl: None,
        })
    }

    fn socket_type(&self) -> SocketType {
        SocketType::Dgram
    }

    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        self.socket
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket_ipv4())
            .map(|addr| *addr.ip())
    }
}
