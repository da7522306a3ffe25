#![warn(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub use cancel::CancelToken;
pub use error::ProbeError;
pub use icmp::v4::SocketType;
pub use ping::{PingConfig, PingSession, PingStats, Verbosity, MAX_PAYLOAD_SIZE};
pub use probe::{
    find_loss, probe, spawn_ping, HopLoss, LossReport, PatternRun, PingHandle, ProbeConfig,
    ProbeReport,
};
pub use traceroute::{
    Hop, TraceResult, TracerouteConfig, TracerouteSession, TracerouteVerbosity,
};

pub mod icmp;
pub mod netstats;
pub mod pcap;
pub mod utils;

mod cancel;
mod error;
mod ping;
mod probe;
mod traceroute;
