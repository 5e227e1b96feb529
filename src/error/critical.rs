use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use super::{ConfigError, FsWatcherError};
use crate::{process::ExitResult, watcher::Watcher};

/// Errors which are not recoverable and end the session.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum CriticalError {
	/// The session was cancelled from the outside.
	///
	/// This is the expected way for a session to end. If a process was running when the
	/// cancellation arrived, `exit` holds how it ended.
	#[error("session cancelled{}", describe_exit(.exit))]
	#[diagnostic(code(gowatch::critical::cancelled))]
	Cancelled {
		/// The exit of the process that was stopped on the way out, if any.
		exit: Option<ExitResult>,
	},

	/// The session configuration is invalid.
	#[error(transparent)]
	#[diagnostic(transparent)]
	Config(#[from] ConfigError),

	/// The set of files to watch could not be computed.
	#[error("cannot list files under {path:?}")]
	#[diagnostic(code(gowatch::critical::file_set))]
	FileSet {
		/// The path that could not be read.
		path: PathBuf,

		/// The underlying error.
		#[source]
		err: std::io::Error,
	},

	/// The filesystem watcher could not be created.
	#[error("fs: cannot initialise {kind:?} watcher")]
	#[diagnostic(code(gowatch::critical::watcher_init))]
	WatcherInit {
		/// The kind of watcher.
		kind: Watcher,

		/// The error which occurred.
		#[source]
		#[diagnostic_source]
		err: FsWatcherError,
	},

	/// A path of the watch set could not be registered with the watcher.
	#[error("fs: cannot watch {path:?}")]
	#[diagnostic(code(gowatch::critical::watch_registration))]
	WatchRegistration {
		/// The path that could not be watched.
		path: PathBuf,

		/// The error which occurred.
		#[source]
		#[diagnostic_source]
		err: FsWatcherError,
	},

	/// A critical I/O error occurred.
	#[error("io({about}): {err}")]
	#[diagnostic(code(gowatch::critical::io_error))]
	IoError {
		/// What it was about.
		about: &'static str,

		/// The I/O error which occurred.
		#[source]
		err: std::io::Error,
	},
}

fn describe_exit(exit: &Option<ExitResult>) -> String {
	exit.as_ref()
		.map(|exit| format!(" (last process: {exit})"))
		.unwrap_or_default()
}

impl CriticalError {
	/// Whether this is the graceful end of a cancelled session rather than a failure.
	#[must_use]
	pub const fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled { .. })
	}
}
