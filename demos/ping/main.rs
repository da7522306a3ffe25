use netprobe::{utils, CancelToken, PingConfig, PingSession, SocketType, Verbosity};
use std::time::Duration;

type GenericError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(argh::FromArgs)]
/// ping - send ICMP echo requests and account for every reply
struct Args {
    #[argh(option, short = 'c', default = "5")]
    /// stop after <count> probes; 0 or less runs until interrupted
    count: i64,

    #[argh(option, short = 'i', default = "1.0")]
    /// seconds between probes
    interval: f64,

    #[argh(option, short = 's', default = "64")]
    /// pattern payload bytes per probe
    size: usize,

    #[argh(option, short = 'p', default = "String::from(\"00\")")]
    /// payload fill pattern as a hex byte, e.g. a5
    pattern: String,

    #[argh(option, short = 'l', default = "0")]
    /// with --quiet, print a progress block every <progress> probes
    progress: u64,

    #[argh(switch, short = 'q')]
    /// suppress the per-reply lines
    quiet: bool,

    #[argh(switch)]
    /// use a raw socket instead of a dgram one; needs privileges
    raw: bool,

    #[argh(positional)]
    /// destination host name or IPv4 address
    destination: String,
}

fn parse_pattern(text: &str) -> Result<u8, GenericError> {
    let digits = text.trim_start_matches("0x");
    Ok(u8::from_str_radix(digits, 16)?)
}

fn main() -> Result<(), GenericError> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let args: Args = argh::from_env();
    let destination = utils::lookup_host_v4(&args.destination)?;

    let mut config = PingConfig::new(destination);
    config.count = u64::try_from(args.count).ok().filter(|&count| count > 0);
    config.interval = Duration::from_secs_f64(args.interval);
    config.payload_size = args.size;
    config.pattern = parse_pattern(&args.pattern)?;
    config.progress_every = args.progress;
    config.verbosity = match (args.quiet, args.progress) {
        (false, _) => Verbosity::Full,
        (true, 0) => Verbosity::Silent,
        (true, _) => Verbosity::Minimal,
    };
    config.socket_type = if args.raw { SocketType::Raw } else { SocketType::Dgram };

    println!(
        "PING {} ({}) {} bytes of data, pattern 0x{:02X}",
        args.destination, destination, config.payload_size, config.pattern
    );
    let mut session = PingSession::open(config)?;
    let stats = session.run(&CancelToken::new());
    std::process::exit(i32::from(!stats.is_success()));
}
