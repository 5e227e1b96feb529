use std::{path::PathBuf, time::Duration};

use clap::{ArgAction, Parser, ValueHint};
use gowatch::{
	config::{parse_env, FileConfig, SessionConfig},
	watcher::Watcher,
};
use miette::Result;
use tracing::debug;

const OPTSET_FILES: &str = "File options";
const OPTSET_BUILD: &str = "Build options";
const OPTSET_BEHAVIOUR: &str = "Behaviour options";
const OPTSET_DEBUGGING: &str = "Debugging options";

/// Rebuild and restart a Go program when its sources change.
#[derive(Debug, Clone, Parser)]
#[command(
	author,
	version,
	about,
	long_about = None,
	after_help = "If a gowatch.json file is present in the working directory, its settings replace those given on the command line."
)]
#[cfg_attr(debug_assertions, command(before_help = "⚠ DEBUG BUILD ⚠"))]
pub struct Args {
	/// Arguments to pass to the program when starting it
	#[arg(last = true, value_name = "RUNTIME_ARGS")]
	pub runtime_args: Vec<String>,

	/// Directory to build and run in
	///
	/// Watched paths, patterns, and the config file are all relative to this directory.
	#[arg(
		short = 'C',
		long,
		default_value = ".",
		value_hint = ValueHint::DirPath,
		value_name = "DIR",
	)]
	pub dir: PathBuf,

	/// Watch a specific file or directory
	///
	/// Directories are searched recursively for Go sources, leaving out tests, hidden entries,
	/// and vendored code. By default, the working directory is watched.
	#[arg(
		short,
		long,
		help_heading = OPTSET_FILES,
		value_hint = ValueHint::AnyPath,
		value_name = "PATH",
	)]
	pub watch: Vec<PathBuf>,

	/// Also watch files matching this glob pattern
	///
	/// Patterns are relative to the working directory, and matched files are watched whatever
	/// their extension, for example 'templates/*.html'.
	#[arg(
		short,
		long,
		help_heading = OPTSET_FILES,
		value_name = "GLOB",
	)]
	pub pattern: Vec<String>,

	/// Watch Go sources under vendor directories too
	#[arg(long, help_heading = OPTSET_FILES)]
	pub vendor: bool,

	/// Print the files that would be watched, and exit
	#[arg(long, help_heading = OPTSET_FILES)]
	pub print_files: bool,

	/// Pass a flag to the build command
	///
	/// The output path is chosen by gowatch, so '-o' in any of its forms is refused.
	#[arg(
		short,
		long,
		help_heading = OPTSET_BUILD,
		allow_hyphen_values = true,
		value_name = "FLAG",
	)]
	pub build_flag: Vec<String>,

	/// Set an environment variable for the program
	///
	/// Takes 'KEY=VALUE'. The program otherwise inherits gowatch's environment.
	#[arg(
		short,
		long,
		help_heading = OPTSET_BUILD,
		value_name = "KEY=VALUE",
	)]
	pub env: Vec<String>,

	/// Use a different program to build with
	///
	/// It is invoked as '<PROGRAM> build -o=<OUTPUT> <FLAGS>...'.
	#[arg(
		long,
		help_heading = OPTSET_BUILD,
		default_value = "go",
		value_hint = ValueHint::CommandName,
		value_name = "PROGRAM",
	)]
	pub build_program: PathBuf,

	/// Read settings from this file instead of gowatch.json
	#[arg(
		long,
		value_hint = ValueHint::FilePath,
		value_name = "PATH",
	)]
	pub config: Option<PathBuf>,

	/// Time to wait for the program to exit after interrupting it
	///
	/// When the program is stopped, it first gets an interrupt signal. If it hasn't exited after
	/// this long, it is forcefully killed. Takes a time span such as "5s" or "1min 30s".
	#[arg(
		long,
		help_heading = OPTSET_BEHAVIOUR,
		default_value = "5s",
		value_parser = humantime::parse_duration,
		value_name = "TIMEOUT",
	)]
	pub stop_timeout: Duration,

	/// Poll for filesystem changes
	///
	/// By default, and where available, gowatch uses the operating system's native file system
	/// watching capabilities. This option disables that and instead uses a polling mechanism, which
	/// is less efficient but can work around issues with some file systems.
	///
	/// Optionally takes a time span such as "500ms" to use as the polling interval. If not
	/// specified, the default is 1 second.
	#[arg(
		long,
		help_heading = OPTSET_BEHAVIOUR,
		num_args = 0..=1,
		default_missing_value = "1s",
		require_equals = true,
		value_parser = humantime::parse_duration,
		value_name = "INTERVAL",
	)]
	pub poll: Option<Duration>,

	/// Set diagnostic log level
	///
	/// Use multiple times to increase verbosity, up to '-vvvv'.
	///
	/// Setting $RUST_LOG also works, and takes precedence.
	#[arg(
		short,
		long,
		help_heading = OPTSET_DEBUGGING,
		action = ArgAction::Count,
	)]
	pub verbose: u8,
}

impl Args {
	/// Turn the arguments into a session config, with the config file applied over them.
	pub fn into_config(self) -> Result<SessionConfig> {
		let mut config = SessionConfig {
			watch_dirs: self.watch,
			file_patterns: self.pattern,
			include_vendor: self.vendor,
			print_files: self.print_files,
			build_program: self.build_program,
			build_flags: self.build_flag,
			runtime_args: self.runtime_args,
			env: parse_env(&self.env)?,
			stop_timeout: self.stop_timeout,
			file_watcher: self.poll.map_or(Watcher::Native, Watcher::Poll),
			..SessionConfig::default()
		};

		let file = match self.config {
			Some(path) => Some(FileConfig::load(&self.dir.join(path))?),
			None => FileConfig::find(&self.dir)?,
		};

		if let Some(file) = file {
			debug!(?file, "applying config file");
			file.apply(&mut config)?;
		}

		config.workdir = self.dir;
		Ok(config)
	}
}
