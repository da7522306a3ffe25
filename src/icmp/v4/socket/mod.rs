use super::Ttl;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

mod dgram_socket;
mod raw_socket;

pub use dgram_socket::DgramSocket;
pub use raw_socket::RawSocket;

/// Which transport a session managed to obtain. Engines branch on this for
/// the one semantic difference the kernel imposes: a dgram socket has its
/// echo identifier rewritten and its replies demultiplexed by the kernel,
/// so the identifier in a received frame is not the one the session sent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SocketType {
    /// `SOCK_RAW`: sees every ICMP frame on the host, needs privileges (or
    /// `CAP_NET_RAW`), and can write its own IPv4 header.
    Raw,
    /// `SOCK_DGRAM`: unprivileged where `net.ipv4.ping_group_range` allows,
    /// kernel-framed and kernel-filtered.
    Dgram,
}

#[derive(Copy, Clone, Debug)]
pub struct SocketConfig {
    pub read_timeout: Duration,
    pub send_timeout: Duration,
    /// Hand-built IPv4 headers on send (`IP_HDRINCL`). Raw sockets only;
    /// ignored for dgram.
    pub header_included: bool,
}

/// One inbound ICMP frame, already stripped down to its ICMP bytes.
#[derive(Clone, Debug)]
pub struct Received {
    /// ICMP frame length now sitting at the front of the caller's buffer.
    pub len: usize,
    pub from: Ipv4Addr,
    /// Remaining TTL of the delivering IP frame; only a raw socket sees it.
    pub ttl: Option<Ttl>,
}

/// The transport seam between the probing engines and the operating system.
/// Both implementations deliver bare ICMP bytes; the raw one strips the IP
/// header it is handed before returning.
pub trait Socket: Send + Sync {
    fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> io::Result<usize>;
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Received>;
    fn socket_type(&self) -> SocketType;
    /// The address the kernel bound us to, once known.
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}

pub fn open_socket(socket_type: SocketType, config: &SocketConfig) -> io::Result<Box<dyn Socket>> {
    match socket_type {
        SocketType::Raw => Ok(Box::new(RawSocket::new(config)?)),
        SocketType::Dgram => Ok(Box::new(DgramSocket::new(config)?)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::icmp::v4::{checksum, Ipv4Header};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub(crate) enum OnSend {
        Accept,
        Fail,
    }

    /// One scripted answer per `recv_from` call; an exhausted script keeps
    /// answering `WouldBlock`. Replies are synthesized from the most recent
    /// recorded send, the way the network would echo it back.
    #[derive(Clone, Debug)]
    pub(crate) enum OnReceive {
        WouldBlock,
        /// Echo the last sent frame back as a reply from its destination.
        EchoBack,
        /// Like `EchoBack` but flip one payload byte without fixing the
        /// checksum.
        EchoBackCorrupted(usize),
        /// Like `EchoBack` but flip one payload byte and repair the
        /// checksum, leaving a wrong-pattern frame that sums clean.
        EchoBackWrongPattern(usize),
        /// Reply with a foreign echo identifier (checksum repaired).
        EchoBackForeignIdentifier,
        /// A router answering a TTL-limited probe: quote the last sent raw
        /// frame inside a time-exceeded message from this address.
        TimeExceededFrom(Ipv4Addr),
        /// The given address answering a raw probe frame (IP header
        /// included in the sent bytes) with an echo reply.
        EchoReplyRawFrom(Ipv4Addr),
        /// `len` bytes of zeros, as undecodable wire noise.
        Short(usize),
    }

    #[derive(Clone)]
    pub(crate) struct SocketMock {
        socket_type: SocketType,
        on_send: OnSend,
        script: Arc<Mutex<VecDeque<OnReceive>>>,
        sent: Arc<Mutex<Vec<(Vec<u8>, SocketAddrV4)>>>,
    }

    impl SocketMock {
        pub(crate) fn new(socket_type: SocketType, on_send: OnSend, script: Vec<OnReceive>) -> Self {
            Self {
                socket_type,
                on_send,
                script: Arc::new(Mutex::new(script.into())),
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn should_send_number_of_messages(&self, n: usize) -> &Self {
            assert_eq!(n, self.sent.lock().unwrap().len());
            self
        }

        pub(crate) fn should_send_to_address(&self, addr: &SocketAddrV4) -> &Self {
            assert!(self
                .sent
                .lock()
                .unwrap()
                .iter()
                .any(|(_, sent_to)| sent_to == addr));
            self
        }

        pub(crate) fn sent_frames(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().iter().map(|(frame, _)| frame.clone()).collect()
        }

        fn last_sent(&self) -> (Vec<u8>, SocketAddrV4) {
            self.sent.lock().unwrap().last().cloned().expect("no frame was sent")
        }

        fn fix_checksum(frame: &mut [u8]) {
            frame[2..4].copy_from_slice(&[0, 0]);
            let sum = checksum(frame);
            frame[2..4].copy_from_slice(&sum.to_be_bytes());
        }

        /// Turns the last sent echo request into the reply the destination
        /// would send back.
        fn echo_back(&self) -> (Vec<u8>, Ipv4Addr) {
            let (mut frame, addr) = self.last_sent();
            frame[0] = 0;
            Self::fix_checksum(&mut frame);
            (frame, *addr.ip())
        }
    }

    impl Socket for SocketMock {
        fn send_to(&self, buf: &[u8], addr: SocketAddrV4) -> io::Result<usize> {
            if self.on_send == OnSend::Fail {
                return Err(io::Error::new(io::ErrorKind::Other, "simulated send failure"));
            }
            self.sent.lock().unwrap().push((buf.to_vec(), addr));
            Ok(buf.len())
        }

        fn recv_from(&self, buf: &mut [u8]) -> io::Result<Received> {
            let action = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(OnReceive::WouldBlock);
            let (frame, from) = match action {
                OnReceive::WouldBlock => {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "nothing scripted"));
                }
                OnReceive::EchoBack => self.echo_back(),
                OnReceive::EchoBackCorrupted(payload_offset) => {
                    let (mut frame, from) = self.echo_back();
                    frame[crate::icmp::v4::ECHO_MIN_LEN + payload_offset] ^= 0xFF;
                    (frame, from)
                }
                OnReceive::EchoBackWrongPattern(payload_offset) => {
                    let (mut frame, from) = self.echo_back();
                    frame[crate::icmp::v4::ECHO_MIN_LEN + payload_offset] ^= 0xFF;
                    Self::fix_checksum(&mut frame);
                    (frame, from)
                }
                OnReceive::EchoBackForeignIdentifier => {
                    let (mut frame, from) = self.echo_back();
                    frame[4] ^= 0xFF;
                    Self::fix_checksum(&mut frame);
                    (frame, from)
                }
                OnReceive::TimeExceededFrom(router) => {
                    let (sent, _) = self.last_sent();
                    let quote_len = sent.len().min(28);
                    let mut frame = vec![0u8; 8];
                    frame[0] = 11;
                    frame.extend_from_slice(&sent[..quote_len]);
                    Self::fix_checksum(&mut frame);
                    (frame, router)
                }
                OnReceive::EchoReplyRawFrom(from) => {
                    let (sent, _) = self.last_sent();
                    let (_, header_len) =
                        Ipv4Header::decode(&sent).expect("sent frame carries no IP header");
                    let mut frame = sent[header_len..].to_vec();
                    frame[0] = 0;
                    Self::fix_checksum(&mut frame);
                    (frame, from)
                }
                OnReceive::Short(len) => (vec![0u8; len], Ipv4Addr::new(203, 0, 113, 9)),
            };
            buf[..frame.len()].copy_from_slice(&frame);
            Ok(Received {
                len: frame.len(),
                from,
                ttl: Some(Ttl(64)),
            })
        }

        fn socket_type(&self) -> SocketType {
            self.socket_type
        }

        fn local_ipv4(&self) -> Option<Ipv4Addr> {
            None
        }
    }

    #[test]
    fn mock_echoes_the_last_sent_frame_with_a_clean_checksum() {
        let mock = SocketMock::new(SocketType::Dgram, OnSend::Accept, vec![OnReceive::EchoBack]);
        let request = crate::icmp::v4::EchoPacket::request(
            0x0102,
            crate::icmp::v4::SequenceNumber(0),
            crate::icmp::v4::EchoTimestamp::now(),
            0xEE,
            8,
        );
        let destination = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 0);
        mock.send_to(request.as_bytes(), destination).unwrap();

        let mut buf = [0u8; 128];
        let received = mock.recv_from(&mut buf).unwrap();

        assert_eq!(request.as_bytes().len(), received.len);
        assert_eq!(Ipv4Addr::new(127, 0, 0, 1), received.from);
        assert_eq!(0, buf[0]);
        assert_eq!(0, checksum(&buf[..received.len]));
        mock.should_send_number_of_messages(1).should_send_to_address(&destination);
    }
}
