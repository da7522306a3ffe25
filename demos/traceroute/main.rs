use netprobe::{utils, CancelToken, TracerouteConfig, TracerouteSession, TracerouteVerbosity};
use std::path::PathBuf;

type GenericError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(argh::FromArgs)]
/// traceroute - discover the path to a host with TTL-limited echo probes
struct Args {
    #[argh(option, short = 'm', default = "128")]
    /// give up after this many hops
    max_hops: u8,

    #[argh(switch, short = 'n')]
    /// print addresses without reverse-resolving them
    numeric: bool,

    #[argh(switch, short = 'v')]
    /// also print retry chatter
    verbose: bool,

    #[argh(switch, short = 'q')]
    /// print nothing; the exit code still tells
    quiet: bool,

    #[argh(option)]
    /// write every sent probe frame to this pcap file
    capture: Option<PathBuf>,

    #[argh(positional)]
    /// destination host name or IPv4 address
    destination: String,
}

fn main() -> Result<(), GenericError> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let args: Args = argh::from_env();
    let destination = utils::lookup_host_v4(&args.destination)?;

    let mut config = TracerouteConfig::new(destination);
    config.max_hops = args.max_hops;
    config.resolve_names = !args.numeric;
    config.capture_path = args.capture;
    config.verbosity = if args.quiet {
        TracerouteVerbosity::Silent
    } else if args.verbose {
        TracerouteVerbosity::Verbose
    } else {
        TracerouteVerbosity::Full
    };

    println!(
        "traceroute to {} ({}), {} hops max",
        args.destination, destination, config.max_hops
    );
    let mut session = TracerouteSession::open(config)?;
    let result = session.run(&CancelToken::new())?;
    if !args.quiet {
        if result.reached_destination {
            println!("Reached {} in {} hops", destination, result.hops.len());
        } else {
            println!("Gave up after {} hops", result.hops.len());
        }
    }
    std::process::exit(i32::from(!result.reached_destination));
}
