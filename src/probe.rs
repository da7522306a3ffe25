//! Canned diagnosis routines built from the two engines: a long
//! pattern-sweep soak against a set of targets, per-hop loss localization,
//! and a ping session running on its own thread.

use crate::cancel::CancelToken;
use crate::error::ProbeError;
use crate::ping::{PingConfig, PingSession, PingStats, Verbosity, MAX_PAYLOAD_SIZE};
use crate::traceroute::{TraceResult, TracerouteConfig, TracerouteSession, TracerouteVerbosity};
use std::net::Ipv4Addr;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Payload fills chosen to stress line coding: alternating bits, solid
/// ones, solid zeros, walking bits, and mixes.
const PATTERNS: [u8; 10] = [0xA5, 0xAA, 0xFF, 0x01, 0x10, 0xF0, 0x0F, 0x7F, 0x00, 0x5A];
/// Payload sizes from a fraction of an MTU up to heavily fragmented.
const SIZES: [usize; 10] = [
    128, 512, 4096, 8192, 16_384, 20_000, 30_000, 32_768, 48_000, 50_000,
];

const SOAK_PROBES: u64 = 100;
const SOAK_INTERVAL: Duration = Duration::from_millis(250);
const LOSS_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub targets: Vec<Ipv4Addr>,
    /// Soak budget per target; runs in progress finish past it.
    pub duration: Duration,
    /// Pattern/size combinations per pass over the tables.
    pub tries: usize,
    /// Upper clamp on the table payload sizes.
    pub max_size: usize,
    pub verbose: bool,
}

impl ProbeConfig {
    #[must_use]
    pub fn new(targets: Vec<Ipv4Addr>) -> ProbeConfig {
        ProbeConfig {
            targets,
            duration: Duration::from_secs(300),
            tries: PATTERNS.len(),
            max_size: MAX_PAYLOAD_SIZE,
            verbose: false,
        }
    }
}

/// One ping run of the soak, with the pattern and size it used.
#[derive(Clone, Debug)]
pub struct PatternRun {
    pub pattern: u8,
    pub payload_size: usize,
    pub stats: PingStats,
}

#[derive(Clone, Debug)]
pub struct ProbeReport {
    pub target: Ipv4Addr,
    /// The path to the target, when the route sweep got anywhere.
    pub route: Option<TraceResult>,
    pub runs: Vec<PatternRun>,
}

/// Soaks every target: a route sweep first, then repeated ping runs
/// cycling through the pattern and size tables until the per-target time
/// budget runs out.
#[must_use]
pub fn probe(config: &ProbeConfig, cancel: &CancelToken) -> Vec<ProbeReport> {
    config
        .targets
        .iter()
        .map(|&target| probe_one(config, target, cancel))
        .collect()
}

fn probe_one(config: &ProbeConfig, target: Ipv4Addr, cancel: &CancelToken) -> ProbeReport {
    println!("Probing {target}");
    let mut route_config = TracerouteConfig::new(target);
    route_config.verbosity = if config.verbose {
        TracerouteVerbosity::Full
    } else {
        TracerouteVerbosity::Silent
    };
    let route = TracerouteSession::open(route_config).and_then(|mut session| session.run(cancel));
    let route = match route {
        Ok(result) => Some(result),
        Err(error) => {
            tracing::warn!(%target, %error, "route sweep failed");
            None
        }
    };

    let deadline = Instant::now() + config.duration;
    let mut runs = Vec::new();
    'soak: loop {
        for index in 0..config.tries {
            // The budget is checked between runs, so a started run always
            // finishes.
            if cancel.is_cancelled() || Instant::now() >= deadline {
                break 'soak;
            }
            let (pattern, payload_size) = table_entry(index, config.max_size);
            println!("------------------------");
            println!("Pinging {target}, pattern 0x{pattern:02X}, payload size {payload_size}");
            let mut ping_config = PingConfig::new(target);
            ping_config.count = Some(SOAK_PROBES);
            ping_config.interval = SOAK_INTERVAL;
            ping_config.payload_size = payload_size;
            ping_config.pattern = pattern;
            ping_config.verbosity = if config.verbose {
                Verbosity::Full
            } else {
                Verbosity::Minimal
            };
            match PingSession::open(ping_config) {
                Ok(mut session) => {
                    let stats = session.run(cancel);
                    runs.push(PatternRun {
                        pattern,
                        payload_size,
                        stats,
                    });
                }
                Err(error) => {
                    tracing::warn!(%target, %error, "ping session failed to open");
                    println!("  Failed: {error}");
                }
            }
        }
    }
    ProbeReport {
        target,
        route,
        runs,
    }
}

/// Cycles both tables, clamping the size to the configured maximum. An
/// index beyond the tables wraps around rather than falling off.
fn table_entry(index: usize, max_size: usize) -> (u8, usize) {
    let pattern = PATTERNS[index % PATTERNS.len()];
    let size = SIZES[index % SIZES.len()].clamp(1, max_size);
    (pattern, size)
}

/// Loss figures for one hop of the path.
#[derive(Clone, Debug)]
pub struct HopLoss {
    pub address: Ipv4Addr,
    pub display: String,
    pub sent: u64,
    pub lost: u64,
    /// The hop could not be pinged at all.
    pub failed: bool,
}

impl HopLoss {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn loss_ratio(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 / self.sent as f64
        }
    }
}

#[derive(Clone, Debug)]
pub struct LossReport {
    pub hops: Vec<HopLoss>,
    /// The hop nearest to us that dropped anything; loss usually starts
    /// where the broken link is.
    pub suspect: Option<Ipv4Addr>,
}

/// Walks the path to `destination` and pings every hop `samples` times,
/// looking for the node where loss begins.
pub fn find_loss(
    destination: Ipv4Addr,
    samples: u64,
    cancel: &CancelToken,
) -> Result<LossReport, ProbeError> {
    let mut route_config = TracerouteConfig::new(destination);
    route_config.verbosity = TracerouteVerbosity::Silent;
    route_config.max_hops = u8::MAX;
    let route = TracerouteSession::open(route_config)?.run(cancel)?;

    let mut hops = Vec::new();
    for hop in &route.hops {
        if cancel.is_cancelled() {
            break;
        }
        let mut ping_config = PingConfig::new(hop.address);
        ping_config.count = Some(samples);
        ping_config.interval = LOSS_SAMPLE_INTERVAL;
        ping_config.verbosity = Verbosity::Silent;
        match PingSession::open(ping_config) {
            Ok(mut session) => {
                let stats = session.run(cancel);
                println!(
                    "{:2} {} {:.2}% PL",
                    hop.distance,
                    hop.display,
                    100.0 * stats.loss_ratio()
                );
                hops.push(HopLoss {
                    address: hop.address,
                    display: hop.display.clone(),
                    sent: stats.sent,
                    lost: stats.lost,
                    failed: false,
                });
            }
            Err(error) => {
                tracing::warn!(address = %hop.address, %error, "hop is unpingable");
                println!("{:2} {} failed", hop.distance, hop.display);
                hops.push(HopLoss {
                    address: hop.address,
                    display: hop.display.clone(),
                    sent: 0,
                    lost: 0,
                    failed: true,
                });
            }
        }
    }
    let suspect = first_lossy(&hops);
    Ok(LossReport { hops, suspect })
}

fn first_lossy(hops: &[HopLoss]) -> Option<Ipv4Addr> {
    hops.iter()
        .find(|hop| !hop.failed && hop.lost > 0)
        .map(|hop| hop.address)
}

/// A ping session running on its own thread, stoppable through its token.
pub struct PingHandle {
    cancel: CancelToken,
    thread: JoinHandle<PingStats>,
}

impl PingHandle {
    /// A token shared with the running session; cancelling it stops the
    /// session at the next probe boundary.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cancels the session and hands back its statistics.
    pub fn stop(self) -> thread::Result<PingStats> {
        self.cancel.cancel();
        self.thread.join()
    }

    /// Waits for a bounded session to finish on its own.
    pub fn join(self) -> thread::Result<PingStats> {
        self.thread.join()
    }
}

/// Opens a session for `config` and runs it on a background thread. The
/// socket is opened here, on the caller's thread, so privilege problems
/// surface before anything is spawned.
pub fn spawn_ping(config: PingConfig) -> Result<PingHandle, ProbeError> {
    let mut session = PingSession::open(config)?;
    let cancel = CancelToken::new();
    let thread_token = cancel.clone();
    let thread = thread::spawn(move || session.run(&thread_token));
    Ok(PingHandle { cancel, thread })
}
