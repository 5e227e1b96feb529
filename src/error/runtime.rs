use std::{path::PathBuf, process::ExitStatus};

use miette::Diagnostic;
use thiserror::Error;

/// Errors which only affect one attempt at building, starting, or stopping the process.
///
/// These are reported to the log sink and the `on_process_exit` hook, and the session keeps
/// waiting for the next change.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum RuntimeError {
	/// The build program could not be launched at all.
	#[error("build: cannot run {program:?}: {err}")]
	#[diagnostic(code(gowatch::runtime::build_launch))]
	BuildLaunch {
		/// The build program.
		program: PathBuf,

		/// The underlying error.
		#[source]
		err: std::io::Error,
	},

	/// The build ran and failed.
	#[error("build: {program:?} exited with {status}")]
	#[diagnostic(code(gowatch::runtime::build))]
	Build {
		/// The build program.
		program: PathBuf,

		/// How the build ended.
		status: ExitStatus,
	},

	/// The built binary could not be started.
	#[error("start: cannot spawn {path:?}: {err}")]
	#[diagnostic(code(gowatch::runtime::spawn))]
	Spawn {
		/// Path to the built binary.
		path: PathBuf,

		/// The underlying error.
		#[source]
		err: std::io::Error,
	},

	/// The interrupt could not be delivered to the running process.
	///
	/// The process may or may not still be running; if it exits later, that exit is reported
	/// like any other.
	#[error("stop: cannot signal process {pid}: {err}")]
	#[diagnostic(code(gowatch::runtime::stop))]
	Stop {
		/// The process id.
		pid: u32,

		/// The underlying error.
		#[source]
		err: std::io::Error,
	},

	/// Waiting for a stopping process was cut short by the session's cancellation.
	#[error("stop: cancelled while waiting for the process to exit")]
	#[diagnostic(code(gowatch::runtime::stop_cancelled))]
	Cancelled,

	/// The filesystem watcher reported an error.
	#[error("fs watcher: {0}")]
	#[diagnostic(code(gowatch::runtime::subscription))]
	Subscription(#[source] notify::Error),
}
