//! Sessions against real sockets on the loopback interface. These need
//! either a permissive `net.ipv4.ping_group_range` or CAP_NET_RAW, so
//! they are ignored by default; run them with `cargo test -- --ignored`
//! on a host that has the privileges.

use netprobe::{
    spawn_ping, CancelToken, PingConfig, PingSession, SocketType, TracerouteConfig,
    TracerouteSession, TracerouteVerbosity, Verbosity,
};
use std::net::Ipv4Addr;
use std::sync::Once;
use std::time::Duration;

use more_asserts as ma;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

static SETUP: Once = Once::new();

fn setup() {
    SETUP.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::ERROR).finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

const LOCALHOST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

fn localhost_config(socket_type: SocketType) -> PingConfig {
    let mut config = PingConfig::new(LOCALHOST);
    config.count = Some(2);
    config.interval = Duration::from_millis(100);
    config.read_timeout = Duration::from_millis(500);
    config.payload_size = 32;
    config.verbosity = Verbosity::Silent;
    config.socket_type = socket_type;
    config
}

#[test]
#[ignore = "needs net.ipv4.ping_group_range to cover this process"]
fn dgram_ping_to_localhost_round_trips() {
    setup();

    let mut session = PingSession::open(localhost_config(SocketType::Dgram)).unwrap();
    let stats = session.run(&CancelToken::new());

    assert_eq!(2, stats.sent);
    assert_eq!(2, stats.replies);
    assert!(stats.is_success());
    ma::assert_gt!(stats.avg_ms, 0.0);
}

#[test]
#[ignore = "needs CAP_NET_RAW or root"]
fn raw_ping_to_localhost_round_trips() {
    setup();

    let mut session = PingSession::open(localhost_config(SocketType::Raw)).unwrap();
    let stats = session.run(&CancelToken::new());

    assert_eq!(2, stats.sent);
    assert_eq!(2, stats.replies);
    assert!(stats.is_success());
}

#[test]
#[ignore = "needs CAP_NET_RAW or root"]
fn traceroute_to_localhost_is_a_single_hop() {
    setup();

    let mut config = TracerouteConfig::new(LOCALHOST);
    config.max_hops = 8;
    config.verbosity = TracerouteVerbosity::Silent;
    let mut session = TracerouteSession::open(config).unwrap();
    let result = session.run(&CancelToken::new()).unwrap();

    assert!(result.reached_destination);
    assert_eq!(1, result.hops.len());
    assert_eq!(LOCALHOST, result.hops[0].address);
}

#[test]
#[ignore = "needs net.ipv4.ping_group_range to cover this process"]
fn a_spawned_session_stops_on_demand() {
    setup();

    let mut config = localhost_config(SocketType::Dgram);
    config.count = None;
    config.interval = Duration::from_millis(10);

    let handle = spawn_ping(config).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let stats = handle.stop().unwrap();

    ma::assert_ge!(stats.sent, 1);
}

#[test]
fn the_kernel_netstat_table_parses() {
    setup();

    let counters = netprobe::netstats::from_proc().unwrap();

    assert!(!counters.is_empty());
    assert!(counters.iter().all(|(name, _)| !name.is_empty()));
}
