use netprobe::netstats;
use std::fs;
use std::path::PathBuf;

type GenericError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(argh::FromArgs)]
/// netstats - dump kernel network counters in a readable column
struct Args {
    #[argh(positional)]
    /// a file in /proc/net/netstat format; the live one when omitted
    file: Option<PathBuf>,
}

fn main() -> Result<(), GenericError> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let args: Args = argh::from_env();
    let counters = match &args.file {
        Some(path) => netstats::parse(&fs::read_to_string(path)?),
        None => netstats::from_proc()?,
    };
    for (name, value) in counters {
        println!("{name:<30}: {value}");
    }
    Ok(())
}
