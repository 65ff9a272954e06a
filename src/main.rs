//! Backoff Governor CLI
//!
//! Replays a sequence of failure signals against a governor and prints the
//! resulting state as JSON.

use std::io::Write;

use backoff_governor::{time, BackoffGovernor, Error, FailureSignal, GovernorConfig, Result};

const USAGE: &str = "\
Usage: backoff-governor [--config <path>] <signal>...

Signals:
  abort                       client-side abort or timeout
  generic                     any other failed request
  http:<status>               non-throttling HTTP error
  ratelimit[:<secs>][:global] throttling response, optional reset hint

Environment variables:
  RUST_LOG=debug              show every recorded failure";

fn parse_args(args: &[String]) -> Result<(GovernorConfig, Vec<FailureSignal>)> {
    let mut config = GovernorConfig::default();
    let mut signals = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter
                .next()
                .ok_or_else(|| Error::Config("--config requires a path".to_string()))?;
            config = GovernorConfig::load(path)?;
        } else {
            signals.push(arg.parse()?);
        }
    }

    Ok((config, signals))
}

fn run(args: &[String]) -> Result<()> {
    let (config, signals) = parse_args(args)?;
    let governor = BackoffGovernor::new(&config);

    for signal in signals {
        governor.report(signal);
        tracing::info!(
            %signal,
            timeout_ms = time::as_millis(governor.get_timeout()),
            "replayed signal"
        );
    }

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &governor.snapshot())?;
    writeln!(stdout)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|arg| arg == "--help" || arg == "-h") {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
