use super::checksum::checksum;
use super::ipv4_header::{Ipv4Header, IPPROTO_ICMP};
use super::SequenceNumber;
use std::error::Error;
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

pub const ICMP_HEADER_LEN: usize = 8;
/// Smallest echo frame: header plus the embedded timestamp.
pub const ECHO_MIN_LEN: usize = ICMP_HEADER_LEN + EchoTimestamp::WIRE_LEN;
/// Smallest time-exceeded frame: header, quoted minimal IPv4 header, and the
/// first eight bytes of the quoted datagram.
const TIME_EXCEEDED_MIN_LEN: usize = ICMP_HEADER_LEN + 20 + ICMP_HEADER_LEN;

/// The ICMP message types the probing engines understand. Everything else on
/// the wire is somebody else's traffic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IcmpKind {
    EchoReply,
    EchoRequest,
    TimeExceeded,
}

impl IcmpKind {
    #[must_use]
    pub const fn wire_type(self) -> u8 {
        match self {
            IcmpKind::EchoReply => 0,
            IcmpKind::EchoRequest => 8,
            IcmpKind::TimeExceeded => 11,
        }
    }

    fn from_wire(value: u8) -> Option<IcmpKind> {
        match value {
            0 => Some(IcmpKind::EchoReply),
            8 => Some(IcmpKind::EchoRequest),
            11 => Some(IcmpKind::TimeExceeded),
            _ => None,
        }
    }
}

impl fmt::Display for IcmpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpKind::EchoReply => write!(f, "echo reply"),
            IcmpKind::EchoRequest => write!(f, "echo request"),
            IcmpKind::TimeExceeded => write!(f, "time exceeded"),
        }
    }
}

/// Monotonic send time carried in the first eight payload bytes of every
/// echo frame, big-endian seconds then nanoseconds. A reply echoes the bytes
/// back, so the round trip is `now - embedded` without keeping a send table.
///
/// Times are measured from a process-wide epoch initialized on first use;
/// they are only meaningful to the process that produced them, which is all
/// an echoed-back timestamp needs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EchoTimestamp {
    pub secs: u32,
    pub nanos: u32,
}

impl EchoTimestamp {
    pub const WIRE_LEN: usize = 8;

    #[must_use]
    pub fn now() -> EchoTimestamp {
        let elapsed = monotonic_now();
        #[allow(clippy::cast_possible_truncation)]
        EchoTimestamp {
            secs: (elapsed.as_secs() & 0xFFFF_FFFF) as u32,
            nanos: elapsed.subsec_nanos(),
        }
    }

    /// Time since this stamp was taken, zero if the stamp is not from this
    /// process (or otherwise in the future).
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        monotonic_now().saturating_sub(Duration::new(u64::from(self.secs), 0) + Duration::from_nanos(u64::from(self.nanos)))
    }

    fn write_to(self, bytes: &mut [u8]) {
        bytes[0..4].copy_from_slice(&self.secs.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.nanos.to_be_bytes());
    }

    fn read_from(bytes: &[u8]) -> EchoTimestamp {
        EchoTimestamp {
            secs: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            nanos: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

fn monotonic_now() -> Duration {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed()
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// Fewer bytes than the minimum frame size for this kind. Raw sockets
    /// share the wire with every other protocol, so this is routine.
    TooShort { len: usize, min: usize },
    /// An ICMP type the engines do not speak.
    UnknownKind { value: u8 },
    /// A time-exceeded body quoting something other than an echo request.
    QuotedNotEcho,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort { len, min } => {
                write!(f, "frame too short: {len} bytes, need at least {min}")
            }
            DecodeError::UnknownKind { value } => write!(f, "unrecognized ICMP type {value}"),
            DecodeError::QuotedNotEcho => {
                write!(f, "time-exceeded body does not quote an echo request")
            }
        }
    }
}

impl Error for DecodeError {}

/// Outcome of checking a frame that already matched this session's kind and
/// identifier. Distinguishes "addressed to me but damaged" from the silent
/// skip a foreign frame gets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Validity {
    Valid,
    ChecksumMismatch,
    PatternMismatch { offset: usize, found: u8 },
}

/// One ICMP echo message with its full wire frame.
///
/// For `TimeExceeded` frames the identifier and sequence are taken from the
/// quoted datagram inside the body, so callers match intermediate-router
/// replies against their session identifier the same way as direct replies.
#[derive(Clone, Debug)]
pub struct EchoPacket {
    pub kind: IcmpKind,
    pub code: u8,
    pub identifier: u16,
    pub sequence: SequenceNumber,
    /// Embedded send time; `None` for time-exceeded frames, whose quote ends
    /// before the timestamp.
    pub timestamp: Option<EchoTimestamp>,
    bytes: Vec<u8>,
}

impl EchoPacket {
    /// Builds an echo-request frame: header, embedded timestamp, then
    /// `payload_size` bytes of `pattern`. The checksum is computed over the
    /// finished frame and patched in last.
    #[must_use]
    pub fn request(
        identifier: u16,
        sequence: SequenceNumber,
        timestamp: EchoTimestamp,
        pattern: u8,
        payload_size: usize,
    ) -> EchoPacket {
        let mut bytes = vec![0u8; ECHO_MIN_LEN + payload_size];
        bytes[0] = IcmpKind::EchoRequest.wire_type();
        bytes[4..6].copy_from_slice(&identifier.to_be_bytes());
        bytes[6..8].copy_from_slice(&sequence.0.to_be_bytes());
        timestamp.write_to(&mut bytes[ICMP_HEADER_LEN..ECHO_MIN_LEN]);
        bytes[ECHO_MIN_LEN..].fill(pattern);
        let sum = checksum(&bytes);
        bytes[2..4].copy_from_slice(&sum.to_be_bytes());
        EchoPacket {
            kind: IcmpKind::EchoRequest,
            code: 0,
            identifier,
            sequence,
            timestamp: Some(timestamp),
            bytes,
        }
    }

    /// Parses a received ICMP frame. Field extraction is bounds-checked
    /// against the supplied length only; nothing embedded in the data is
    /// trusted to describe its own size.
    pub fn decode(bytes: &[u8]) -> Result<EchoPacket, DecodeError> {
        if bytes.len() < ICMP_HEADER_LEN {
            return Err(DecodeError::TooShort { len: bytes.len(), min: ICMP_HEADER_LEN });
        }
        let kind = IcmpKind::from_wire(bytes[0]).ok_or(DecodeError::UnknownKind { value: bytes[0] })?;
        let code = bytes[1];
        match kind {
            IcmpKind::EchoReply | IcmpKind::EchoRequest => {
                if bytes.len() < ECHO_MIN_LEN {
                    return Err(DecodeError::TooShort { len: bytes.len(), min: ECHO_MIN_LEN });
                }
                Ok(EchoPacket {
                    kind,
                    code,
                    identifier: u16::from_be_bytes([bytes[4], bytes[5]]),
                    sequence: SequenceNumber(u16::from_be_bytes([bytes[6], bytes[7]])),
                    timestamp: Some(EchoTimestamp::read_from(&bytes[ICMP_HEADER_LEN..ECHO_MIN_LEN])),
                    bytes: bytes.to_vec(),
                })
            }
            IcmpKind::TimeExceeded => {
                if bytes.len() < TIME_EXCEEDED_MIN_LEN {
                    return Err(DecodeError::TooShort { len: bytes.len(), min: TIME_EXCEEDED_MIN_LEN });
                }
                let (quoted_header, quoted_header_len) = Ipv4Header::decode(&bytes[ICMP_HEADER_LEN..])?;
                if quoted_header.protocol != IPPROTO_ICMP {
                    return Err(DecodeError::QuotedNotEcho);
                }
                let quote = &bytes[ICMP_HEADER_LEN + quoted_header_len..];
                if quote.len() < ICMP_HEADER_LEN {
                    return Err(DecodeError::TooShort {
                        len: bytes.len(),
                        min: ICMP_HEADER_LEN + quoted_header_len + ICMP_HEADER_LEN,
                    });
                }
                if quote[0] != IcmpKind::EchoRequest.wire_type() {
                    return Err(DecodeError::QuotedNotEcho);
                }
                Ok(EchoPacket {
                    kind,
                    code,
                    identifier: u16::from_be_bytes([quote[4], quote[5]]),
                    sequence: SequenceNumber(u16::from_be_bytes([quote[6], quote[7]])),
                    timestamp: None,
                    bytes: bytes.to_vec(),
                })
            }
        }
    }

    /// Checks integrity of a frame already known to be addressed to this
    /// session. The whole frame summed with its stored checksum in place
    /// must fold to complement-neutral; the pattern check covers exactly the
    /// payload bytes that arrived, so a truncated-but-intact frame passes.
    #[must_use]
    pub fn validate(&self, pattern: u8) -> Validity {
        if checksum(&self.bytes) != 0 {
            return Validity::ChecksumMismatch;
        }
        for (offset, &byte) in self.payload().iter().enumerate() {
            if byte != pattern {
                return Validity::PatternMismatch { offset, found: byte };
            }
        }
        Validity::Valid
    }

    /// The pattern-filled region after the embedded timestamp. Empty for
    /// time-exceeded frames.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self.kind {
            IcmpKind::EchoReply | IcmpKind::EchoRequest => &self.bytes[ECHO_MIN_LEN..],
            IcmpKind::TimeExceeded => &[],
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
