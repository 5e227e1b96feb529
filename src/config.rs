//! Configuration for a gowatch session.
//!
//! A [`SessionConfig`] is built once, handed to [`run()`](crate::run()), and never changes while
//! the session lives. It can be put together in code, from the command line, or from a
//! [`FileConfig`] found on disk.

use std::{
	fmt,
	fs::{self, File},
	io,
	path::{Path, PathBuf},
	process::Stdio,
	sync::Arc,
	time::Duration,
};

use serde::Deserialize;
use tracing::debug;

use crate::{
	error::{ConfigError, RuntimeError},
	process::ExitResult,
	watcher::Watcher,
};

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "gowatch.json";

/// Default grace period between interrupting a process and killing it.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a session needs to know.
#[derive(Clone, Debug)]
pub struct SessionConfig {
	/// Directory the build and the program run in, and relative paths are resolved from.
	pub workdir: PathBuf,

	/// Directories (or files) to look for Go sources in. Empty means the working directory.
	pub watch_dirs: Vec<PathBuf>,

	/// Glob patterns for more files to watch, whatever their extension.
	pub file_patterns: Vec<String>,

	/// Whether to descend into `vendor` directories.
	pub include_vendor: bool,

	/// Print the resolved files and return instead of running.
	pub print_files: bool,

	/// The toolchain program, invoked as `<program> build -o=<out> <flags…>`.
	pub build_program: PathBuf,

	/// Extra flags for the build. Must not set the output location.
	pub build_flags: Vec<String>,

	/// Arguments passed verbatim to the program.
	pub runtime_args: Vec<String>,

	/// Environment set for the program on top of gowatch's own.
	pub env: Vec<(String, String)>,

	/// How long a stopping process gets before it is killed.
	pub stop_timeout: Duration,

	/// Which kind of filesystem watcher to use.
	pub file_watcher: Watcher,

	/// Where the build's and the program's output goes.
	pub output: Output,

	/// Lifecycle callbacks.
	pub hooks: Hooks,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			workdir: PathBuf::from("."),
			watch_dirs: Vec::new(),
			file_patterns: Vec::new(),
			include_vendor: false,
			print_files: false,
			build_program: PathBuf::from("go"),
			build_flags: Vec::new(),
			runtime_args: Vec::new(),
			env: Vec::new(),
			stop_timeout: DEFAULT_STOP_TIMEOUT,
			file_watcher: Watcher::default(),
			output: Output::default(),
			hooks: Hooks::default(),
		}
	}
}

impl SessionConfig {
	/// Check that no build flag tries to set the output location.
	pub fn validate_build_flags(&self) -> Result<(), ConfigError> {
		if let Some(flag) = self.build_flags.iter().find(|f| is_output_flag(f)) {
			return Err(ConfigError::OutputFlag { flag: flag.clone() });
		}

		Ok(())
	}
}

/// Whether a build flag sets the output location (`-o`, `--o`, and their `=` forms).
#[must_use]
pub fn is_output_flag(flag: &str) -> bool {
	flag == "-o" || flag == "--o" || flag.starts_with("-o=") || flag.starts_with("--o=")
}

/// Parse `KEY=VALUE` environment overrides.
///
/// The value may be empty and may itself contain `=`; the key may not be empty.
pub fn parse_env<S: AsRef<str>>(entries: &[S]) -> Result<Vec<(String, String)>, ConfigError> {
	entries
		.iter()
		.map(|entry| {
			let entry = entry.as_ref();
			match entry.split_once('=') {
				Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
				_ => Err(ConfigError::EnvEntry {
					entry: entry.to_owned(),
				}),
			}
		})
		.collect()
}

type StdioSink = Arc<dyn Fn() -> io::Result<Stdio> + Send + Sync>;

/// Where the standard output and error of the build and of the program go.
///
/// Each sink is asked for a fresh [`Stdio`] whenever a build or the program is launched. Both
/// are inherited from gowatch unless set.
///
/// ```no_run
/// # use std::fs::File;
/// # use gowatch::config::Output;
/// let output = Output::file(File::create("server.log")?);
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Clone)]
pub struct Output {
	stdout: StdioSink,
	stderr: StdioSink,
}

impl Default for Output {
	fn default() -> Self {
		Self {
			stdout: Arc::new(|| Ok::<_, io::Error>(Stdio::inherit())),
			stderr: Arc::new(|| Ok::<_, io::Error>(Stdio::inherit())),
		}
	}
}

impl fmt::Debug for Output {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Output").finish_non_exhaustive()
	}
}

impl Output {
	/// Send both streams to the same file.
	#[must_use]
	pub fn file(file: File) -> Self {
		let file = Arc::new(file);
		let err_file = Arc::clone(&file);
		Self {
			stdout: Arc::new(move || file.try_clone().map(Stdio::from)),
			stderr: Arc::new(move || err_file.try_clone().map(Stdio::from)),
		}
	}

	/// Where standard output goes.
	#[must_use]
	pub fn stdout(mut self, f: impl Fn() -> io::Result<Stdio> + Send + Sync + 'static) -> Self {
		self.stdout = Arc::new(f);
		self
	}

	/// Where standard error goes.
	#[must_use]
	pub fn stderr(mut self, f: impl Fn() -> io::Result<Stdio> + Send + Sync + 'static) -> Self {
		self.stderr = Arc::new(f);
		self
	}

	pub(crate) fn stdio(&self) -> io::Result<(Stdio, Stdio)> {
		Ok(((self.stdout)()?, (self.stderr)()?))
	}
}

type FileChangeHook = Arc<dyn Fn(&Path) + Send + Sync>;
type ProcessStartHook = Arc<dyn Fn() + Send + Sync>;
type ProcessExitHook = Arc<dyn Fn(Result<&ExitResult, &RuntimeError>) + Send + Sync>;
type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks into the session's lifecycle.
///
/// All of them run on the supervisor's control task, so they should return quickly. Unset hooks
/// do nothing, except for the log sink which defaults to printing to stderr.
///
/// ```
/// # use gowatch::config::Hooks;
/// let hooks = Hooks::default()
///     .on_file_change(|path| eprintln!("{} changed", path.display()))
///     .on_process_exit(|result| match result {
///         Ok(exit) => eprintln!("process ended: {exit}"),
///         Err(err) => eprintln!("could not run: {err}"),
///     });
/// ```
#[derive(Clone)]
pub struct Hooks {
	file_change: FileChangeHook,
	process_start: ProcessStartHook,
	process_exit: ProcessExitHook,
	log: LogSink,
}

impl Default for Hooks {
	fn default() -> Self {
		Self {
			file_change: Arc::new(|_: &Path| {}),
			process_start: Arc::new(|| {}),
			process_exit: Arc::new(|_: Result<&ExitResult, &RuntimeError>| {}),
			log: Arc::new(|message: &str| eprintln!("[gowatch] {message}")),
		}
	}
}

impl fmt::Debug for Hooks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Hooks").finish_non_exhaustive()
	}
}

impl Hooks {
	/// Called with the path of a watched file whose contents were written.
	#[must_use]
	pub fn on_file_change(mut self, f: impl Fn(&Path) + Send + Sync + 'static) -> Self {
		self.file_change = Arc::new(f);
		self
	}

	/// Called when a freshly built process has been started.
	#[must_use]
	pub fn on_process_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
		self.process_start = Arc::new(f);
		self
	}

	/// Called when a process ends without having been asked to, or when building, starting, or
	/// stopping one fails.
	#[must_use]
	pub fn on_process_exit(
		mut self,
		f: impl Fn(Result<&ExitResult, &RuntimeError>) + Send + Sync + 'static,
	) -> Self {
		self.process_exit = Arc::new(f);
		self
	}

	/// Where user-facing messages go.
	#[must_use]
	pub fn log_to(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
		self.log = Arc::new(f);
		self
	}

	pub(crate) fn file_changed(&self, path: &Path) {
		(self.file_change)(path);
	}

	pub(crate) fn process_started(&self) {
		(self.process_start)();
	}

	pub(crate) fn process_exited(&self, result: Result<&ExitResult, &RuntimeError>) {
		(self.process_exit)(result);
	}

	pub(crate) fn log(&self, message: &str) {
		(self.log)(message);
	}
}

/// The configuration file.
///
/// All fields are optional. When a file is used, its fields replace the corresponding ones from
/// the command line wholesale.
///
/// ```json
/// {
///   "watchDirs": ["cmd/server", "internal"],
///   "additionalFilePatterns": ["templates/*.html"],
///   "buildFlags": ["-race"],
///   "runtimeArgs": ["--listen", ":8080"],
///   "includeVendor": false,
///   "printFilesOnly": false,
///   "env": ["LOG_LEVEL=debug"]
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct FileConfig {
	/// See [`SessionConfig::watch_dirs`].
	pub watch_dirs: Vec<PathBuf>,

	/// See [`SessionConfig::file_patterns`].
	pub additional_file_patterns: Vec<String>,

	/// See [`SessionConfig::build_flags`].
	pub build_flags: Vec<String>,

	/// See [`SessionConfig::runtime_args`].
	pub runtime_args: Vec<String>,

	/// See [`SessionConfig::include_vendor`].
	pub include_vendor: bool,

	/// See [`SessionConfig::print_files`].
	pub print_files_only: bool,

	/// `KEY=VALUE` entries, see [`SessionConfig::env`].
	pub env: Vec<String>,
}

impl FileConfig {
	/// Read and parse a configuration file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		debug!(?path, "loading config file");
		let contents = fs::read_to_string(path).map_err(|err| ConfigError::FileRead {
			path: path.to_path_buf(),
			err,
		})?;

		serde_json::from_str(&contents).map_err(|err| ConfigError::FileParse {
			path: path.to_path_buf(),
			err,
		})
	}

	/// Load [`CONFIG_FILE_NAME`] from the directory, if it exists there.
	pub fn find(dir: &Path) -> Result<Option<Self>, ConfigError> {
		let path = dir.join(CONFIG_FILE_NAME);
		if path.is_file() {
			Self::load(&path).map(Some)
		} else {
			debug!(?path, "no config file");
			Ok(None)
		}
	}

	/// Replace the non-callback fields of the session config with this file's.
	pub fn apply(self, config: &mut SessionConfig) -> Result<(), ConfigError> {
		config.env = parse_env(&self.env)?;
		config.watch_dirs = self.watch_dirs;
		config.file_patterns = self.additional_file_patterns;
		config.build_flags = self.build_flags;
		config.runtime_args = self.runtime_args;
		config.include_vendor = self.include_vendor;
		config.print_files = self.print_files_only;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn output_flags() {
		for flag in ["-o", "--o", "-o=foo", "--o=foo", "-o=", "--o=./bin/x"] {
			assert!(is_output_flag(flag), "{flag}");
		}
		for flag in ["-race", "-tags=dev", "-ldflags=-s -w", "-overlay=x.json", "o", "-mod=vendor"]
		{
			assert!(!is_output_flag(flag), "{flag}");
		}
	}

	#[test]
	fn validate_finds_the_offender() {
		let config = SessionConfig {
			build_flags: vec!["-race".into(), "--o=foo".into(), "-v".into()],
			..SessionConfig::default()
		};
		match config.validate_build_flags() {
			Err(ConfigError::OutputFlag { flag }) => assert_eq!(flag, "--o=foo"),
			other => panic!("expected output flag error, got {other:?}"),
		}
	}

	#[test]
	fn env_entries() {
		assert_eq!(
			parse_env(&["A=1", "B=", "C=x=y"]).unwrap(),
			[
				("A".to_owned(), "1".to_owned()),
				("B".to_owned(), String::new()),
				("C".to_owned(), "x=y".to_owned()),
			]
		);
		assert!(matches!(
			parse_env(&["NOVALUE"]),
			Err(ConfigError::EnvEntry { .. })
		));
		assert!(matches!(
			parse_env(&["=value"]),
			Err(ConfigError::EnvEntry { .. })
		));
	}

	#[test]
	fn file_config_parses() {
		let file: FileConfig = serde_json::from_str(
			r#"{
				"watchDirs": ["cmd", "internal"],
				"additionalFilePatterns": ["*.html"],
				"buildFlags": ["-race"],
				"runtimeArgs": ["--port", "8080"],
				"includeVendor": true,
				"printFilesOnly": false,
				"env": ["MODE=dev"]
			}"#,
		)
		.unwrap();

		let mut config = SessionConfig {
			runtime_args: vec!["from-cli".into()],
			stop_timeout: Duration::from_secs(1),
			..SessionConfig::default()
		};
		file.apply(&mut config).unwrap();

		assert_eq!(config.watch_dirs, [PathBuf::from("cmd"), PathBuf::from("internal")]);
		assert_eq!(config.file_patterns, ["*.html"]);
		assert_eq!(config.build_flags, ["-race"]);
		assert_eq!(config.runtime_args, ["--port", "8080"]);
		assert!(config.include_vendor);
		assert!(!config.print_files);
		assert_eq!(config.env, [("MODE".to_owned(), "dev".to_owned())]);
		assert_eq!(config.stop_timeout, Duration::from_secs(1));
	}

	#[test]
	fn file_config_fields_are_optional() {
		let file: FileConfig = serde_json::from_str("{}").unwrap();
		assert_eq!(file, FileConfig::default());
	}

	#[test]
	fn file_config_rejects_unknown_fields() {
		assert!(serde_json::from_str::<FileConfig>(r#"{"watchdirs": []}"#).is_err());
	}

	#[test]
	fn find_in_directory() {
		let dir = tempfile::tempdir().unwrap();
		assert_eq!(FileConfig::find(dir.path()).unwrap(), None);

		fs::write(
			dir.path().join(CONFIG_FILE_NAME),
			r#"{"buildFlags": ["-tags=dev"]}"#,
		)
		.unwrap();
		let file = FileConfig::find(dir.path()).unwrap().unwrap();
		assert_eq!(file.build_flags, ["-tags=dev"]);

		fs::write(dir.path().join(CONFIG_FILE_NAME), "{ nope").unwrap();
		assert!(matches!(
			FileConfig::find(dir.path()),
			Err(ConfigError::FileParse { .. })
		));
	}
}
