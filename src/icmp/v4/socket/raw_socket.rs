use super::{Received, Socket, SocketConfig, SocketType};
use crate::icmp::v4::Ipv4Header;
use socket2::{Domain, Protocol, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

/// `SOCK_RAW` ICMP transport. Inbound frames arrive with their IPv4 header
/// still attached; it is stripped here so callers only ever see ICMP bytes.
pub struct RawSocket {
    socket: socket2::Socket,
}

impl RawSocket {
    pub fn new(config: &SocketConfig) -> Result<RawSocket, io::Error> {
        tracing::trace!(header_included = config.header_included, "opening raw icmp socket");
        let socket = socket2::Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_read_timeout(Some(config.read_timeout))?;
        socket.set_write_timeout(Some(config.send_timeout))?;
        if config.header_included {
            socket.set_header_included(true)?;
        }
        Ok(RawSocket { socket })
    }
}

impl Socket for RawSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> io::Result<usize> {
        self.socket.send_to(buf, &addr.into())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Received> {
        // Socket2 guarantees it will not read from the buffer, which makes
        // the cast from `&mut [u8]` to `&mut [MaybeUninit<u8>]` sound; going
        // through MaybeUninit properly would need unsafe to copy back out.
        // https://docs.rs/socket2/0.4.7/socket2/struct.Socket.html#method.recv
        let (len, socket_addr) = self.socket.recv_from(unsafe {
            &mut *(std::ptr::addr_of_mut!(*buf) as *mut [std::mem::MaybeUninit<u8>])
        })?;
        let (header, header_len) = Ipv4Header::decode(&buf[..len])
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        buf.copy_within(header_len..len, 0);
        // recvfrom on linux fills the source address in; the header copy is
        // the fallback.
        let from = socket_addr
            .as_socket_ipv4()
            .map_or(header.source, |addr| *addr.ip());
        Ok(Received {
            len: len - header_len,
            from,
            ttl: Some(header.ttl),
        })
    }

    fn socket_type(&self) -> SocketType {
        SocketType::Raw
    }

    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        self.socket
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket_ipv4())
            .map(|addr| *addr.ip())
    }
}
