use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors in the session configuration, caught before anything is built or watched.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ConfigError {
	/// A build flag would override where the build writes its output.
	#[error("build flag {flag:?} is disallowed because gowatch manages the build output for you")]
	#[diagnostic(
		code(gowatch::config::output_flag),
		help("remove the -o flag; the binary is written to a temporary directory")
	)]
	OutputFlag {
		/// The offending flag, as given.
		flag: String,
	},

	/// An environment override is not in `KEY=VALUE` form.
	#[error("environment override {entry:?} is not of the form KEY=VALUE")]
	#[diagnostic(code(gowatch::config::env_entry))]
	EnvEntry {
		/// The entry as given.
		entry: String,
	},

	/// An additional file pattern is not a valid glob.
	#[error("invalid file pattern {pattern:?}")]
	#[diagnostic(code(gowatch::config::pattern))]
	Pattern {
		/// The pattern as given.
		pattern: String,

		/// The underlying error.
		#[source]
		err: glob::PatternError,
	},

	/// The configuration file could not be read.
	#[error("cannot read config file {path:?}")]
	#[diagnostic(code(gowatch::config::file_read))]
	FileRead {
		/// Path to the configuration file.
		path: PathBuf,

		/// The underlying error.
		#[source]
		err: std::io::Error,
	},

	/// The configuration file is not valid.
	#[error("cannot parse config file {path:?}")]
	#[diagnostic(code(gowatch::config::file_parse))]
	FileParse {
		/// Path to the configuration file.
		path: PathBuf,

		/// The underlying error.
		#[source]
		err: serde_json::Error,
	},
}

/// Errors emitted when setting up the filesystem watcher.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum FsWatcherError {
	/// Error received when creating a filesystem watcher fails.
	///
	/// Also see `TooManyWatches` and `TooManyHandles`.
	#[error("failed to instantiate")]
	#[diagnostic(help("perhaps retry with the poll watcher"))]
	Create(#[source] notify::Error),

	/// Creating or extending the watcher failed because there are too many watches.
	///
	/// This is the OS error 28 on Linux.
	#[error("too many watches")]
	#[cfg_attr(target_os = "linux", diagnostic(help("you will want to increase your inotify.max_user_watches, see inotify(7)")))]
	TooManyWatches(#[source] notify::Error),

	/// Creating or extending the watcher failed because there are too many file handles open.
	///
	/// This is the OS error 24 on Linux. It may also occur when the limit for inotify instances is reached.
	#[error("too many handles")]
	#[cfg_attr(target_os = "linux", diagnostic(help("you will want to increase your `nofile` limit, see pam_limits(8); or increase your inotify.max_user_instances, see inotify(7)")))]
	TooManyHandles(#[source] notify::Error),
}

impl From<notify::Error> for FsWatcherError {
	fn from(err: notify::Error) -> Self {
		if cfg!(target_os = "linux")
			&& (matches!(err.kind, notify::ErrorKind::MaxFilesWatch)
				|| matches!(err.kind, notify::ErrorKind::Io(ref ioerr) if ioerr.raw_os_error() == Some(28)))
		{
			Self::TooManyWatches(err)
		} else if cfg!(target_os = "linux")
			&& matches!(err.kind, notify::ErrorKind::Io(ref ioerr) if ioerr.raw_os_error() == Some(24))
		{
			Self::TooManyHandles(err)
		} else {
			Self::Create(err)
		}
	}
}
