use crate::cancel::CancelToken;
use crate::error::ProbeError;
use crate::icmp::v4::{
    open_socket, EchoPacket, EchoTimestamp, IcmpKind, Ipv4Header, SequenceNumber, Socket,
    SocketConfig, SocketType, Ttl, IPPROTO_ICMP,
};
use crate::pcap::{LinkType, PcapWriter};
use crate::utils;
use rand::Rng;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

/// Send-or-receive failures tolerated per hop before the path is declared
/// dead.
const HOP_RETRY_BUDGET: u32 = 10;
const HOP_TIMEOUT: Duration = Duration::from_secs(2);
const RECV_BUFFER_LEN: usize = 4096;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum TracerouteVerbosity {
    Silent,
    /// One line per discovered hop.
    Full,
    /// Hop lines plus retry chatter.
    Verbose,
}

#[derive(Clone, Debug)]
pub struct TracerouteConfig {
    pub destination: Ipv4Addr,
    /// Largest TTL to probe; the sweep gives up beyond it.
    pub max_hops: u8,
    pub verbosity: TracerouteVerbosity,
    /// Reverse-resolve each hop for display. Off by default so a sweep
    /// never blocks on a resolver.
    pub resolve_names: bool,
    /// Write every sent probe frame to this pcap file.
    pub capture_path: Option<PathBuf>,
}

impl TracerouteConfig {
    #[must_use]
    pub fn new(destination: Ipv4Addr) -> TracerouteConfig {
        TracerouteConfig {
            destination,
            max_hops: 128,
            verbosity: TracerouteVerbosity::Full,
            resolve_names: false,
            capture_path: None,
        }
    }
}

/// One node that answered a TTL-limited probe.
#[derive(Clone, Debug)]
pub struct Hop {
    pub address: Ipv4Addr,
    /// Reverse-resolved name, or the dotted address when there is none.
    pub display: String,
    /// 1-based position in the path.
    pub distance: usize,
}

#[derive(Clone, Debug)]
pub struct TraceResult {
    pub hops: Vec<Hop>,
    /// Whether the sweep ended with an echo reply from the destination
    /// itself, as opposed to running out of hops.
    pub reached_destination: bool,
}

/// A TTL sweep against one destination. Needs a raw socket: the probes
/// carry hand-built IPv4 headers, and the interesting answers are
/// time-exceeded messages no dgram socket will ever see.
pub struct TracerouteSession {
    config: TracerouteConfig,
    socket: Box<dyn Socket>,
    identifier: u16,
    capture: Option<PcapWriter>,
    recv_buf: Vec<u8>,
}

impl TracerouteSession {
    pub fn open(config: TracerouteConfig) -> Result<TracerouteSession, ProbeError> {
        let socket_config = SocketConfig {
            read_timeout: HOP_TIMEOUT,
            send_timeout: HOP_TIMEOUT,
            header_included: true,
        };
        let socket = open_socket(SocketType::Raw, &socket_config)
            .map_err(|error| ProbeError::socket("open raw icmp socket", error))?;
        let capture = match &config.capture_path {
            Some(path) => match PcapWriter::create(path, LinkType::RawIpv4) {
                Ok(writer) => Some(writer),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "capture disabled");
                    None
                }
            },
            None => None,
        };
        Ok(Self::assemble(config, socket, capture))
    }

    /// Builds a session on an already-open transport, without capture.
    pub fn with_socket<S: Socket + 'static>(
        config: TracerouteConfig,
        socket: S,
    ) -> TracerouteSession {
        Self::assemble(config, Box::new(socket), None)
    }

    fn assemble(
        config: TracerouteConfig,
        socket: Box<dyn Socket>,
        capture: Option<PcapWriter>,
    ) -> TracerouteSession {
        TracerouteSession {
            config,
            socket,
            identifier: rand::thread_rng().gen::<u16>(),
            capture,
            recv_buf: vec![0u8; RECV_BUFFER_LEN],
        }
    }

    /// Walks the TTL range, recording one hop per TTL, until the
    /// destination answers with an echo reply or the range runs out.
    /// Cancellation returns the hops recorded so far.
    ///
    /// # Errors
    ///
    /// `ProbeError::RetriesExhausted` once a single hop eats the whole
    /// retry budget; the path is presumed dead past the recorded hops.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<TraceResult, ProbeError> {
        tracing::debug!(
            destination = %self.config.destination,
            identifier = self.identifier,
            max_hops = self.config.max_hops,
            "traceroute start"
        );
        let mut hops: Vec<Hop> = Vec::new();
        let mut reached_destination = false;

        'sweep: for ttl_value in 1..=self.config.max_hops {
            if cancel.is_cancelled() {
                tracing::debug!(ttl = ttl_value, "traceroute cancelled");
                break 'sweep;
            }
            let ttl = Ttl(ttl_value);
            let mut retries = HOP_RETRY_BUDGET;

            'attempt: loop {
                let frame = self.build_probe(ttl);
                self.capture_frame(&frame);
                let addr = SocketAddrV4::new(self.config.destination, 0);
                match self.socket.send_to(&frame, addr) {
                    Ok(sent) if sent == frame.len() => {}
                    Ok(sent) => {
                        tracing::warn!(%ttl, sent, expected = frame.len(), "short send");
                        self.consume_retry(&mut retries, hops.len())?;
                        continue 'attempt;
                    }
                    Err(error) => {
                        tracing::warn!(%ttl, %error, "send failed");
                        self.consume_retry(&mut retries, hops.len())?;
                        continue 'attempt;
                    }
                }

                loop {
                    let received = match self.socket.recv_from(&mut self.recv_buf) {
                        Ok(received) => received,
                        Err(error)
                            if matches!(
                                error.kind(),
                                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                            ) =>
                        {
                            self.consume_retry(&mut retries, hops.len())?;
                            continue 'attempt;
                        }
                        Err(error) => {
                            tracing::warn!(%ttl, %error, "receive failed");
                            self.consume_retry(&mut retries, hops.len())?;
                            continue 'attempt;
                        }
                    };
                    let packet = match EchoPacket::decode(&self.recv_buf[..received.len]) {
                        Ok(packet) => packet,
                        Err(error) => {
                            tracing::trace!(%error, from = %received.from, "skipping undecodable frame");
                            continue;
                        }
                    };
                    if !self.accepts(&packet) {
                        tracing::trace!(
                            kind = %packet.kind,
                            identifier = packet.identifier,
                            "skipping frame for another session"
                        );
                        continue;
                    }

                    let display = if self.config.resolve_names {
                        utils::display_address(received.from)
                    } else {
                        received.from.to_string()
                    };
                    let hop = Hop {
                        address: received.from,
                        display,
                        distance: hops.len() + 1,
                    };
                    if self.config.verbosity >= TracerouteVerbosity::Full {
                        println!("{:2} {}", hop.distance, hop.display);
                    }
                    tracing::debug!(distance = hop.distance, address = %hop.address, "hop");
                    reached_destination = packet.kind == IcmpKind::EchoReply
                        && received.from == self.config.destination;
                    hops.push(hop);
                    if reached_destination {
                        break 'sweep;
                    }
                    continue 'sweep;
                }
            }
        }

        Ok(TraceResult {
            hops,
            reached_destination,
        })
    }

    /// A probe is sixteen echo bytes under a hand-built IPv4 header. The
    /// sequence mirrors the TTL so a quoted answer names its hop, and the
    /// IP identification mirrors the session identifier.
    fn build_probe(&self, ttl: Ttl) -> Vec<u8> {
        let request = EchoPacket::request(
            self.identifier,
            SequenceNumber(u16::from(ttl.0)),
            EchoTimestamp::now(),
            0x00,
            0,
        );
        let header = Ipv4Header {
            // The kernel fills the source in when we leave it unspecified.
            source: self.socket.local_ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED),
            destination: self.config.destination,
            ttl,
            protocol: IPPROTO_ICMP,
            identification: self.identifier,
        };
        let mut frame = header.encode(request.as_bytes().len()).to_vec();
        frame.extend_from_slice(request.as_bytes());
        frame
    }

    /// Either kind of answer must quote (or carry) our identifier;
    /// everything else on the wire belongs to somebody else.
    fn accepts(&self, packet: &EchoPacket) -> bool {
        matches!(packet.kind, IcmpKind::TimeExceeded | IcmpKind::EchoReply)
            && packet.identifier == self.identifier
    }

    fn consume_retry(&self, retries: &mut u32, recorded: usize) -> Result<(), ProbeError> {
        *retries -= 1;
        if self.config.verbosity == TracerouteVerbosity::Verbose {
            println!("Retry {}...", *retries);
        }
        if *retries == 0 {
            if self.config.verbosity >= TracerouteVerbosity::Full {
                println!("Max retries exceeded, exiting..");
            }
            return Err(ProbeError::RetriesExhausted { hops: recorded });
        }
        Ok(())
    }

    fn capture_frame(&mut self, frame: &[u8]) {
        let failed = match self.capture.as_mut() {
            Some(writer) => match writer.append_now(frame) {
                Ok(()) => false,
                Err(error) => {
                    tracing::warn!(%error, "capture write failed; capture disabled");
                    true
                }
            },
            None => false,
        };
        if failed {
            self.capture = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmp::v4::socket::tests::{OnReceive, OnSend, SocketMock};

    const DESTINATION: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 44);

    fn test_config(max_hops: u8) -> TracerouteConfig {
        let mut config = TracerouteConfig::new(DESTINATION);
        config.max_hops = max_hops;
        config.verbosity = TracerouteVerbosity::Silent;
        config
    }

    fn run_with_script(max_hops: u8, script: Vec<OnReceive>) -> (Result<TraceResult, ProbeError>, SocketMock) {
        let mock = SocketMock::new(SocketType::Raw, OnSend::Accept, script);
        let handle = mock.clone();
        let mut session = TracerouteSession::with_socket(test_config(max_hops), mock);
        (session.run(&CancelToken::new()), handle)
    }

    #[test]
    fn a_three_hop_path_is_recorded_in_order() {
        let script = vec![
            OnReceive::TimeExceededFrom(Ipv4Addr::new(10, 0, 0, 1)),
            OnReceive::TimeExceededFrom(Ipv4Addr::new(10, 0, 0, 2)),
            OnReceive::EchoReplyRawFrom(DESTINATION),
        ];
        let (result, mock) = run_with_script(64, script);
        let result = result.unwrap();

        assert!(result.reached_destination);
        assert_eq!(3, result.hops.len());
        assert_eq!(Ipv4Addr::new(10, 0, 0, 1), result.hops[0].address);
        assert_eq!(Ipv4Addr::new(10, 0, 0, 2), result.hops[1].address);
        assert_eq!(DESTINATION, result.hops[2].address);
        assert_eq!(vec![1, 2, 3], result.hops.iter().map(|hop| hop.distance).collect::<Vec<_>>());

        // One probe per hop, TTL climbing, sequence mirroring the TTL.
        let frames = mock.sent_frames();
        assert_eq!(3, frames.len());
        for (index, frame) in frames.iter().enumerate() {
            let ttl = u8::try_from(index + 1).unwrap();
            assert_eq!(ttl, frame[8]);
            assert_eq!([0, ttl], frame[26..28]);
        }
    }

    #[test]
    fn running_out_of_hops_is_success_without_reaching() {
        let script = vec![
            OnReceive::TimeExceededFrom(Ipv4Addr::new(10, 0, 0, 1)),
            OnReceive::TimeExceededFrom(Ipv4Addr::new(10, 0, 0, 2)),
        ];
        let (result, _) = run_with_script(2, script);
        let result = result.unwrap();

        assert!(!result.reached_destination);
        assert_eq!(2, result.hops.len());
    }

    #[test]
    fn a_silent_path_exhausts_the_retry_budget() {
        let (result, mock) = run_with_script(64, vec![]);

        match result {
            Err(ProbeError::RetriesExhausted { hops }) => assert_eq!(0, hops),
            other => panic!("expected retry exhaustion, got {other:?}"),
        }
        mock.should_send_number_of_messages(HOP_RETRY_BUDGET as usize);
    }

    #[test]
    fn wire_noise_does_not_consume_retries() {
        let script = vec![
            OnReceive::Short(5),
            OnReceive::Short(12),
            OnReceive::TimeExceededFrom(Ipv4Addr::new(10, 0, 0, 1)),
        ];
        let (result, _) = run_with_script(64, script);

        match result {
            Err(ProbeError::RetriesExhausted { hops }) => assert_eq!(1, hops),
            other => panic!("expected retry exhaustion after the first hop, got {other:?}"),
        }
    }

    #[test]
    fn an_echo_reply_from_elsewhere_is_a_hop_but_not_the_end() {
        let elsewhere = Ipv4Addr::new(10, 9, 9, 9);
        let script = vec![OnReceive::EchoReplyRawFrom(elsewhere)];
        let (result, _) = run_with_script(64, script);

        match result {
            Err(ProbeError::RetriesExhausted { hops }) => assert_eq!(1, hops),
            other => panic!("expected the sweep to continue past the hop, got {other:?}"),
        }
    }

    #[test]
    fn a_cancelled_token_returns_the_partial_path() {
        let mock = SocketMock::new(SocketType::Raw, OnSend::Accept, vec![]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut session = TracerouteSession::with_socket(test_config(64), mock);
        let result = session.run(&cancel).unwrap();

        assert!(result.hops.is_empty());
        assert!(!result.reached_destination);
    }

    #[test]
    fn send_failures_eventually_exhaust_the_budget() {
        let mock = SocketMock::new(SocketType::Raw, OnSend::Fail, vec![]);
        let mut session = TracerouteSession::with_socket(test_config(64), mock);
        let result = session.run(&CancelToken::new());

        assert!(matches!(result, Err(ProbeError::RetriesExhausted { hops: 0 })));
    }

    #[test]
    fn probe_frames_carry_the_session_identification() {
        let script = vec![OnReceive::EchoReplyRawFrom(DESTINATION)];
        let (result, mock) = run_with_script(64, script);
        assert!(result.unwrap().reached_destination);

        let frames = mock.sent_frames();
        let (header, header_len) = Ipv4Header::decode(&frames[0]).unwrap();
        assert_eq!(DESTINATION, header.destination);
        assert_eq!(IPPROTO_ICMP, header.protocol);
        let request = EchoPacket::decode(&frames[0][header_len..]).unwrap();
        assert_eq!(header.identification, request.identifier);
        assert_eq!(0, request.payload().len());
    }
}
