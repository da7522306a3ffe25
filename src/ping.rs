use crate::cancel::CancelToken;
use crate::error::ProbeError;
use crate::icmp::v4::{
    open_socket, EchoPacket, EchoTimestamp, IcmpKind, Received, SequenceNumber, Socket,
    SocketConfig, SocketType, Validity,
};
use rand::Rng;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on the pattern payload of one probe. Anything bigger cannot
/// fit an IPv4 datagram alongside the headers.
pub const MAX_PAYLOAD_SIZE: usize = 65_500;

/// Passes over the socket after the final probe, waiting for stragglers.
const DRAIN_TRIES: u32 = 15;
const DRAIN_PAUSE: Duration = Duration::from_millis(1);

/// Big enough for a max-size ICMP frame, IP header included.
const RECV_BUFFER_LEN: usize = 65_536;

/// How much a session prints while running. Counters are kept either way;
/// this only controls stdout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Verbosity {
    /// Nothing at all.
    Silent,
    /// Periodic progress blocks and the final summary.
    Minimal,
    /// A line per reply plus the final summary.
    Full,
}

#[derive(Clone, Debug)]
pub struct PingConfig {
    pub destination: Ipv4Addr,
    /// Probes to send; `None` runs until cancelled.
    pub count: Option<u64>,
    pub interval: Duration,
    pub read_timeout: Duration,
    pub send_timeout: Duration,
    /// Pattern bytes after the embedded timestamp.
    pub payload_size: usize,
    pub pattern: u8,
    pub verbosity: Verbosity,
    /// With `Verbosity::Minimal`, print a progress block every this many
    /// probes. Zero disables it.
    pub progress_every: u64,
    pub socket_type: SocketType,
}

impl PingConfig {
    #[must_use]
    pub fn new(destination: Ipv4Addr) -> PingConfig {
        PingConfig {
            destination,
            count: Some(5),
            interval: Duration::from_secs(1),
            read_timeout: Duration::from_millis(500),
            send_timeout: Duration::from_secs(5),
            payload_size: 64,
            pattern: 0x00,
            verbosity: Verbosity::Full,
            progress_every: 0,
            socket_type: SocketType::Dgram,
        }
    }
}

/// Counters for one ping run. `lost` is optimistic: every sent probe counts
/// as lost until its reply arrives, so mid-run reads see in-flight probes
/// as losses.
#[derive(Clone, Debug)]
pub struct PingStats {
    pub sent: u64,
    pub lost: u64,
    /// Replies addressed to us that failed the checksum or pattern check.
    pub corrupted: u64,
    /// Valid replies, duplicates included.
    pub replies: u64,
    /// `f64::INFINITY` until the first valid reply.
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
}

impl PingStats {
    #[must_use]
    pub fn new() -> PingStats {
        PingStats {
            sent: 0,
            lost: 0,
            corrupted: 0,
            replies: 0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            avg_ms: 0.0,
        }
    }

    #[must_use]
    pub fn received(&self) -> u64 {
        self.sent.saturating_sub(self.lost)
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn loss_ratio(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 / self.sent as f64
        }
    }

    /// Every probe answered, every answer intact.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.lost == 0 && self.corrupted == 0
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_rtt(&mut self, rtt_ms: f64) {
        let replies = self.replies as f64;
        self.avg_ms = (replies * self.avg_ms + rtt_ms) / (replies + 1.0);
        self.replies += 1;
        self.min_ms = self.min_ms.min(rtt_ms);
        self.max_ms = self.max_ms.max(rtt_ms);
    }
}

impl Default for PingStats {
    fn default() -> PingStats {
        PingStats::new()
    }
}

/// One echo session against one destination: a socket, a random identifier,
/// and the send/listen loop.
pub struct PingSession {
    config: PingConfig,
    socket: Box<dyn Socket>,
    identifier: u16,
    recv_buf: Vec<u8>,
}

impl PingSession {
    pub fn open(config: PingConfig) -> Result<PingSession, ProbeError> {
        Self::validate(&config)?;
        let socket_config = SocketConfig {
            read_timeout: config.read_timeout,
            send_timeout: config.send_timeout,
            header_included: false,
        };
        let op = match config.socket_type {
            SocketType::Raw => "open raw icmp socket",
            SocketType::Dgram => "open dgram icmp socket",
        };
        let socket = open_socket(config.socket_type, &socket_config)
            .map_err(|error| ProbeError::socket(op, error))?;
        Ok(Self::assemble(config, socket))
    }

    /// Builds a session on an already-open transport. Used by callers that
    /// manage their own sockets and by the scripted tests.
    pub fn with_socket<S: Socket + 'static>(
        config: PingConfig,
        socket: S,
    ) -> Result<PingSession, ProbeError> {
        Self::validate(&config)?;
        Ok(Self::assemble(config, Box::new(socket)))
    }

    fn validate(config: &PingConfig) -> Result<(), ProbeError> {
        if config.payload_size > MAX_PAYLOAD_SIZE {
            return Err(ProbeError::Config(format!(
                "payload size {} exceeds the {MAX_PAYLOAD_SIZE}-byte maximum",
                config.payload_size
            )));
        }
        Ok(())
    }

    fn assemble(config: PingConfig, socket: Box<dyn Socket>) -> PingSession {
        PingSession {
            config,
            socket,
            identifier: rand::thread_rng().gen::<u16>(),
            recv_buf: vec![0u8; RECV_BUFFER_LEN],
        }
    }

    #[must_use]
    pub fn destination(&self) -> Ipv4Addr {
        self.config.destination
    }

    /// Sends probes on the configured interval, listening between sends,
    /// until the count is reached or the token is cancelled. Per-probe
    /// trouble is counted, never fatal; the statistics always come back.
    pub fn run(&mut self, cancel: &CancelToken) -> PingStats {
        tracing::debug!(
            destination = %self.config.destination,
            identifier = self.identifier,
            payload_size = self.config.payload_size,
            "ping session start"
        );
        let mut stats = PingStats::new();
        let mut last_sequence: Option<SequenceNumber> = None;
        let mut probe_index: u64 = 0;
        loop {
            if self.config.count.map_or(false, |count| probe_index >= count) {
                break;
            }
            if cancel.is_cancelled() {
                tracing::debug!(probe_index, "ping session cancelled");
                break;
            }

            let sequence = SequenceNumber::from_probe_index(probe_index);
            self.send_probe(sequence, &mut stats);

            let window_start = Instant::now();
            self.listen_until(window_start + self.config.interval, &mut stats, &mut last_sequence);

            if self.config.verbosity == Verbosity::Minimal
                && self.config.progress_every > 0
                && probe_index % self.config.progress_every == 0
            {
                self.print_progress(&stats, sequence);
            }

            let is_final = self.config.count.map_or(false, |count| probe_index + 1 >= count);
            if is_final {
                if stats.lost > 0 {
                    self.drain(&mut stats, &mut last_sequence);
                }
            } else if let Some(remaining) = self.config.interval.checked_sub(window_start.elapsed())
            {
                thread::sleep(remaining);
            }
            probe_index += 1;
        }
        if self.config.verbosity >= Verbosity::Minimal {
            self.print_summary(&stats);
        }
        stats
    }

    fn send_probe(&mut self, sequence: SequenceNumber, stats: &mut PingStats) {
        let packet = EchoPacket::request(
            self.identifier,
            sequence,
            EchoTimestamp::now(),
            self.config.pattern,
            self.config.payload_size,
        );
        // Optimistic accounting: lost until the reply proves otherwise.
        stats.sent += 1;
        stats.lost += 1;
        let addr = SocketAddrV4::new(self.config.destination, 0);
        if let Err(error) = self.socket.send_to(packet.as_bytes(), addr) {
            tracing::warn!(%sequence, %error, "send failed");
            if self.config.verbosity == Verbosity::Full {
                println!("sendto failed for icmp_seq={sequence}: {error}");
            }
        }
    }

    /// Pulls frames off the socket until the deadline passes or the socket
    /// reports that nothing is waiting. Always attempts at least one
    /// receive, so a reply is never missed because the send ate the window.
    fn listen_until(
        &mut self,
        deadline: Instant,
        stats: &mut PingStats,
        last_sequence: &mut Option<SequenceNumber>,
    ) {
        loop {
            match self.socket.recv_from(&mut self.recv_buf) {
                Ok(received) => self.handle_frame(&received, stats, last_sequence),
                Err(error)
                    if matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    break;
                }
                Err(error) => tracing::trace!(%error, "receive failed"),
            }
            if Instant::now() >= deadline {
                break;
            }
        }
    }

    fn handle_frame(
        &self,
        received: &Received,
        stats: &mut PingStats,
        last_sequence: &mut Option<SequenceNumber>,
    ) {
        let packet = match EchoPacket::decode(&self.recv_buf[..received.len]) {
            Ok(packet) => packet,
            Err(error) => {
                tracing::trace!(%error, from = %received.from, "skipping undecodable frame");
                return;
            }
        };
        if packet.kind != IcmpKind::EchoReply {
            // A raw socket on loopback also sees our own requests go by.
            return;
        }
        // On a dgram socket the kernel owns the identifier and already
        // demultiplexed for us; on a raw socket we see every session's
        // replies and must filter.
        if self.socket.socket_type() == SocketType::Raw && packet.identifier != self.identifier {
            tracing::trace!(
                identifier = packet.identifier,
                "skipping reply for another session"
            );
            return;
        }

        match packet.validate(self.config.pattern) {
            Validity::ChecksumMismatch => {
                stats.corrupted += 1;
                tracing::debug!(sequence = %packet.sequence, "reply failed checksum");
                if self.config.verbosity >= Verbosity::Minimal {
                    println!("malformed ICMP packet with SEQ {}!", packet.sequence);
                    println!("  invalid checksum");
                }
                return;
            }
            Validity::PatternMismatch { offset, found } => {
                stats.corrupted += 1;
                tracing::debug!(
                    sequence = %packet.sequence,
                    offset,
                    found,
                    "reply failed pattern check"
                );
                if self.config.verbosity >= Verbosity::Minimal {
                    println!("malformed ICMP packet with SEQ {}!", packet.sequence);
                    println!(
                        "  payload byte {offset}: expected 0x{:02X}, got 0x{found:02X}",
                        self.config.pattern
                    );
                }
                return;
            }
            Validity::Valid => {}
        }

        // Echo frames always carry the embedded send time.
        let timestamp = packet.timestamp.expect("logic error");
        let rtt_ms = timestamp.elapsed().as_secs_f64() * 1e3;
        let duplicate = stats.lost == 0;
        let out_of_order = match *last_sequence {
            None => packet.sequence != SequenceNumber(0),
            Some(last) => !packet.sequence.follows(last),
        };
        let truncated = packet.payload().len() < self.config.payload_size;

        stats.record_rtt(rtt_ms);
        stats.lost = stats.lost.saturating_sub(1);
        *last_sequence = Some(packet.sequence);

        if self.config.verbosity == Verbosity::Full {
            let mut markers = String::new();
            if out_of_order {
                markers.push_str(" (OUT OF ORDER)");
            }
            if duplicate {
                markers.push_str(" (DUP)");
            }
            if truncated {
                markers.push_str(" (TRUNC)");
            }
            match received.ttl {
                Some(ttl) => println!(
                    "{} bytes from {}: icmp_seq={} ttl={} time={:.2} ms{}",
                    received.len, received.from, packet.sequence, ttl, rtt_ms, markers
                ),
                None => println!(
                    "{} bytes from {}: icmp_seq={} time={:.2} ms{}",
                    received.len, received.from, packet.sequence, rtt_ms, markers
                ),
            }
        }
    }

    /// After the final probe, replies may still be in flight. A bounded
    /// number of short listen passes picks them up without stalling an
    /// unanswered session.
    fn drain(&mut self, stats: &mut PingStats, last_sequence: &mut Option<SequenceNumber>) {
        for _ in 0..DRAIN_TRIES {
            if stats.lost == 0 {
                break;
            }
            thread::sleep(DRAIN_PAUSE);
            self.listen_until(Instant::now() + self.config.read_timeout, stats, last_sequence);
        }
    }

    fn print_progress(&self, stats: &PingStats, sequence: SequenceNumber) {
        println!(
            "{} sent so far, {} in-flight (or lost), {} corrupted, icmp_seq={}",
            stats.sent, stats.lost, stats.corrupted, sequence
        );
        if stats.replies > 0 {
            println!(
                "  min={:.2} ms, max={:.2} ms, avg={:.2} ms",
                stats.min_ms, stats.max_ms, stats.avg_ms
            );
        }
    }

    fn print_summary(&self, stats: &PingStats) {
        println!(
            "{} packets transmitted, {} received, {} corrupted, {:.2}% packet loss",
            stats.sent,
            stats.received(),
            stats.corrupted,
            100.0 * stats.loss_ratio()
        );
        if stats.replies > 0 {
            println!(
                "min={:.2} ms, max={:.2} ms, avg={:.2} ms",
                stats.min_ms, stats.max_ms, stats.avg_ms
            );
        }
    }
}
