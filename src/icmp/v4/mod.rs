mod checksum;
pub use checksum::checksum;

mod ipv4_header;
pub use ipv4_header::{Ipv4Header, IPPROTO_ICMP, IPV4_HEADER_MIN_LEN};

mod packet;
pub use packet::{
    DecodeError, EchoPacket, EchoTimestamp, IcmpKind, Validity, ECHO_MIN_LEN, ICMP_HEADER_LEN,
};

mod sequence_number;
pub use sequence_number::SequenceNumber;

mod ttl;
pub use ttl::Ttl;

pub mod socket;
pub use socket::{open_socket, DgramSocket, RawSocket, Received, Socket, SocketConfig, SocketType};
