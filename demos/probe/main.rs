use netprobe::{probe, utils, CancelToken, ProbeConfig, MAX_PAYLOAD_SIZE};
use std::net::Ipv4Addr;
use std::time::Duration;

type GenericError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(argh::FromArgs)]
/// probe - soak targets with patterned pings after sweeping the route
struct Args {
    #[argh(option, short = 't', default = "300.0")]
    /// seconds to spend per target
    time: f64,

    #[argh(option, short = 'c', default = "10")]
    /// pattern/size combinations per pass
    tries: usize,

    #[argh(option, short = 'm', default = "MAX_PAYLOAD_SIZE")]
    /// clamp the payload sizes to this many bytes
    max_size: usize,

    #[argh(switch, short = 'v')]
    /// per-reply output instead of the periodic summaries
    verbose: bool,

    #[argh(positional)]
    /// target host names or IPv4 addresses
    targets: Vec<String>,
}

fn main() -> Result<(), GenericError> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let args: Args = argh::from_env();
    let mut targets = Vec::<Ipv4Addr>::new();
    for target in &args.targets {
        targets.push(utils::lookup_host_v4(target)?);
    }

    let mut config = ProbeConfig::new(targets);
    config.duration = Duration::from_secs_f64(args.time);
    config.tries = args.tries;
    config.max_size = args.max_size;
    config.verbose = args.verbose;

    let reports = probe(&config, &CancelToken::new());

    let mut clean = true;
    for report in &reports {
        let lossy = report
            .runs
            .iter()
            .filter(|run| !run.stats.is_success())
            .count();
        println!(
            "{}: {} runs, {} with loss or corruption",
            report.target,
            report.runs.len(),
            lossy
        );
        clean &= lossy == 0 && !report.runs.is_empty();
    }
    std::process::exit(i32::from(!clean));
}
