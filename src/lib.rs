//! Gowatch: rebuild and restart a Go program whenever its sources change.
//!
//! This is the library behind the `gowatch` CLI tool. A session resolves the set of files to
//! watch, builds the program with `go build` into a temporary directory, starts it, and then
//! on every write to a watched file stops the running process, rebuilds, and starts it again.
//! Build failures and crashes are reported and the session keeps going; it ends when its
//! cancellation token fires.
//!
//! This library is powered by [Tokio](https://tokio.rs).
//!
//! ```no_run
//! use gowatch::config::{Hooks, SessionConfig};
//! use miette::{IntoDiagnostic, Result};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SessionConfig {
//!         workdir: "./server".into(),
//!         runtime_args: vec!["--port=8080".into()],
//!         hooks: Hooks::default().on_process_start(|| eprintln!("server is up")),
//!         ..SessionConfig::default()
//!     };
//!
//!     let cancel = CancellationToken::new();
//!     let ctrlc = cancel.clone();
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         ctrlc.cancel();
//!     });
//!
//!     match gowatch::run(config, cancel).await {
//!         Err(err) if !err.is_cancelled() => Err(err).into_diagnostic(),
//!         _ => Ok(()),
//!     }
//! }
//! ```
//!
//! Note that the library generates a _lot_ of debug messaging with [tracing]. Messages meant for
//! the user go through the [log hook](config::Hooks::log_to) instead.

#![warn(clippy::unwrap_used, missing_docs)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod pathop;
pub mod paths;
pub mod process;
pub mod run;
pub mod watcher;

#[doc(inline)]
pub use crate::run::run;
