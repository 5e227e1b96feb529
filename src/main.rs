#![deny(rust_2018_idioms)]

use std::env::var;

use clap::Parser;
use miette::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod args;

fn init_logging(verbosity: u8) {
	if var("RUST_LOG").is_ok() {
		match tracing_subscriber::fmt::try_init() {
			Ok(()) => {
				warn!(RUST_LOG=%var("RUST_LOG").unwrap_or_default(), "logging configured from RUST_LOG");
				return;
			}
			Err(e) => eprintln!("Failed to initialise logging with RUST_LOG, falling back\n{e}"),
		}
	}

	let mut builder = tracing_subscriber::fmt().with_env_filter(match verbosity {
		0 => "gowatch=error",
		1 => "gowatch=warn",
		2 => "gowatch=info",
		3 => "gowatch=debug",
		_ => "trace",
	});

	if verbosity > 2 {
		use tracing_subscriber::fmt::format::FmtSpan;
		builder = builder.with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
	}

	let result = if verbosity > 3 {
		builder.pretty().try_init()
	} else {
		builder.try_init()
	};

	match result {
		Ok(()) => info!("logging initialised"),
		Err(e) => eprintln!("Failed to initialise logging, continuing with none\n{e}"),
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = args::Args::parse();
	init_logging(args.verbose);
	debug!(version=%env!("CARGO_PKG_VERSION"), ?args, "arguments");

	let config = args.into_config()?;
	let cancel = CancellationToken::new();

	let ctrlc = cancel.clone();
	tokio::spawn(async move {
		if let Err(err) = tokio::signal::ctrl_c().await {
			warn!(%err, "could not listen for ctrl-c");
			return;
		}
		info!("received ctrl-c, cancelling session");
		ctrlc.cancel();
	});

	match gowatch::run(config, cancel).await {
		Err(err) if err.is_cancelled() => {
			debug!(%err, "session ended");
			Ok(())
		}
		other => Ok(other?),
	}
}
