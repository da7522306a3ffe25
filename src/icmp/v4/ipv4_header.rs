use super::checksum::checksum;
use super::packet::DecodeError;
use super::Ttl;
use std::net::Ipv4Addr;

pub const IPV4_HEADER_MIN_LEN: usize = 20;
pub const IPPROTO_ICMP: u8 = 1;

/// The IPv4 header fields this crate reads or writes. Encoding always emits
/// a minimal 20-byte header (IHL 5, TOS 0, no fragmentation); decoding
/// accepts any IHL and reports the actual header length so callers can skip
/// past options.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ipv4Header {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub ttl: Ttl,
    pub protocol: u8,
    pub identification: u16,
}

impl Ipv4Header {
    /// Encodes a header for a frame carrying `payload_len` bytes after it.
    /// All multi-byte fields are big-endian; the header checksum covers the
    /// header only and is patched in last. `payload_len` must leave the
    /// 16-bit total-length field representable.
    #[must_use]
    pub fn encode(&self, payload_len: usize) -> [u8; IPV4_HEADER_MIN_LEN] {
        let mut bytes = [0u8; IPV4_HEADER_MIN_LEN];
        bytes[0] = 0x45; // version 4, IHL 5
        #[allow(clippy::cast_possible_truncation)]
        let total_len = (IPV4_HEADER_MIN_LEN + payload_len) as u16;
        bytes[2..4].copy_from_slice(&total_len.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.identification.to_be_bytes());
        // flags and fragment offset stay zero
        bytes[8] = self.ttl.0;
        bytes[9] = self.protocol;
        bytes[12..16].copy_from_slice(&self.source.octets());
        bytes[16..20].copy_from_slice(&self.destination.octets());
        let sum = checksum(&bytes);
        bytes[10..12].copy_from_slice(&sum.to_be_bytes());
        bytes
    }

    /// Parses the header at the start of `bytes` and returns it together
    /// with its actual length taken from IHL. Never reads past `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<(Ipv4Header, usize), DecodeError> {
        if bytes.len() < IPV4_HEADER_MIN_LEN {
            return Err(DecodeError::TooShort {
                len: bytes.len(),
                min: IPV4_HEADER_MIN_LEN,
            });
        }
        let header_len = usize::from(bytes[0] & 0x0F) * 4;
        if header_len < IPV4_HEADER_MIN_LEN || bytes.len() < header_len {
            return Err(DecodeError::TooShort {
                len: bytes.len(),
                min: header_len.max(IPV4_HEADER_MIN_LEN),
            });
        }
        Ok((
            Ipv4Header {
                source: Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]),
                destination: Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]),
                ttl: Ttl(bytes[8]),
                protocol: bytes[9],
                identification: u16::from_be_bytes([bytes[4], bytes[5]]),
            },
            header_len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Ipv4Header {
        Ipv4Header {
            source: Ipv4Addr::new(192, 0, 2, 1),
            destination: Ipv4Addr::new(198, 51, 100, 9),
            ttl: Ttl(7),
            protocol: IPPROTO_ICMP,
            identification: 0x4D2E,
        }
    }

    #[test]
    fn encode_then_decode_reproduces_the_fields() {
        let header = sample();
        let bytes = header.encode(16);
        let (decoded, header_len) = Ipv4Header::decode(&bytes).unwrap();
        assert_eq!(header, decoded);
        assert_eq!(IPV4_HEADER_MIN_LEN, header_len);
    }

    #[test]
    fn encoded_header_checksums_to_zero() {
        let bytes = sample().encode(0);
        assert_eq!(0, super::checksum(&bytes));
    }

    #[test]
    fn encoded_fields_match_the_reference_parser() {
        use pnet_packet::ipv4::Ipv4Packet;
        let bytes = sample().encode(8);
        let parsed = Ipv4Packet::new(&bytes).unwrap();
        assert_eq!(4, parsed.get_version());
        assert_eq!(5, parsed.get_header_length());
        assert_eq!(28, parsed.get_total_length());
        assert_eq!(0x4D2E, parsed.get_identification());
        assert_eq!(7, parsed.get_ttl());
        assert_eq!(Ipv4Addr::new(192, 0, 2, 1), parsed.get_source());
        assert_eq!(Ipv4Addr::new(198, 51, 100, 9), parsed.get_destination());
        assert_eq!(
            pnet_packet::ipv4::checksum(&parsed),
            parsed.get_checksum()
        );
    }

    #[test]
    fn short_buffer_is_rejected() {
        let result = Ipv4Header::decode(&[0x45, 0x00, 0x00]);
        assert_eq!(
            Err(DecodeError::TooShort { len: 3, min: 20 }),
            result.map(|(_, len)| len)
        );
    }

    #[test]
    fn ihl_beyond_the_buffer_is_rejected() {
        // IHL 6 claims 24 bytes but only 20 are present.
        let mut bytes = sample().encode(0);
        bytes[0] = 0x46;
        assert!(Ipv4Header::decode(&bytes).is_err());
    }

    #[test]
    fn options_extend_the_reported_length() {
        let mut bytes = sample().encode(0).to_vec();
        bytes[0] = 0x46;
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        let (_, header_len) = Ipv4Header::decode(&bytes).unwrap();
        assert_eq!(24, header_len);
    }
}
