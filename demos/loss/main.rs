use netprobe::{find_loss, utils, CancelToken};

type GenericError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(argh::FromArgs)]
/// loss - ping every hop on the path and point at where loss begins
struct Args {
    #[argh(option, short = 's', default = "50")]
    /// probes per hop
    samples: u64,

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

    let report = find_loss(destination, args.samples, &CancelToken::new())?;
    match report.suspect {
        Some(address) => {
            println!("Likely bad node: {address}");
            std::process::exit(1)
        }
        None => {
            println!("No loss observed along the path");
            Ok(())
        }
    }
}
