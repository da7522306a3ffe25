//! Classic pcap capture files, the little-endian flavor every reader
//! accepts: a 24-byte global header, then one 16-byte record header per
//! frame.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAGIC: u32 = 0xA1B2_C3D4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
const SNAP_LEN: u32 = 65_535;

/// Registered link-layer types for the frames a file carries.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkType {
    Ethernet,
    /// Raw IP, either version, no link framing.
    RawIp,
    Ieee80211,
    RawIpv4,
    RawIpv6,
}

impl LinkType {
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            LinkType::Ethernet => 1,
            LinkType::RawIp => 101,
            LinkType::Ieee80211 => 105,
            LinkType::RawIpv4 => 228,
            LinkType::RawIpv6 => 229,
        }
    }
}

/// Appends frames to one capture file. Frames are buffered; they reach the
/// disk on `flush` or drop.
pub struct PcapWriter {
    out: BufWriter<File>,
}

impl PcapWriter {
    /// Creates (or truncates) `path` and writes the global header.
    pub fn create(path: impl AsRef<Path>, link_type: LinkType) -> io::Result<PcapWriter> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&MAGIC.to_le_bytes())?;
        out.write_all(&VERSION_MAJOR.to_le_bytes())?;
        out.write_all(&VERSION_MINOR.to_le_bytes())?;
        out.write_all(&0u32.to_le_bytes())?; // timezone offset, always UTC
        out.write_all(&0u32.to_le_bytes())?; // timestamp accuracy
        out.write_all(&SNAP_LEN.to_le_bytes())?;
        out.write_all(&link_type.code().to_le_bytes())?;
        Ok(PcapWriter { out })
    }

    /// Appends one frame stamped with the given wall-clock time.
    /// `original_len` is the frame's size on the wire, which may exceed the
    /// bytes captured here.
    #[allow(clippy::cast_possible_truncation)]
    pub fn append(
        &mut self,
        timestamp: SystemTime,
        frame: &[u8],
        original_len: usize,
    ) -> io::Result<()> {
        let since_epoch = timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let captured = frame.len().min(SNAP_LEN as usize);
        self.out.write_all(&(since_epoch.as_secs() as u32).to_le_bytes())?;
        self.out.write_all(&since_epoch.subsec_micros().to_le_bytes())?;
        self.out.write_all(&(captured as u32).to_le_bytes())?;
        self.out.write_all(&(original_len as u32).to_le_bytes())?;
        self.out.write_all(&frame[..captured])?;
        Ok(())
    }

    /// Appends one frame stamped with the current time.
    pub fn append_now(&mut self, frame: &[u8]) -> io::Result<()> {
        self.append(SystemTime::now(), frame, frame.len())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
