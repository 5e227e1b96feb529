//! Building, starting, and stopping the supervised program.

use std::{
	ffi::OsString,
	fmt, io,
	path::{Path, PathBuf},
	process::ExitStatus,
	sync::Arc,
	time::Duration,
};

use tempfile::TempDir;
use tokio::{process::Command, sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
	config::{Output, SessionConfig},
	error::{CriticalError, RuntimeError},
};

/// How a supervised process ended.
///
/// Each [`ProcessHandle`] produces exactly one of these.
#[derive(Clone, Debug)]
pub enum ExitResult {
	/// The process ended after gowatch asked it to stop.
	///
	/// Its own exit code is not considered: a program that exits non-zero on an interrupt is
	/// doing nothing wrong.
	Interrupted,

	/// The process exited on its own with this code.
	ExitCode(i32),

	/// The process was terminated by this signal, from outside gowatch.
	SignalKilled(i32),

	/// The process could not be waited on, so how it ended is unknown.
	SpawnError(Arc<io::Error>),
}

impl ExitResult {
	/// Whether the process ended because it was asked to.
	#[must_use]
	pub const fn is_interrupted(&self) -> bool {
		matches!(self, Self::Interrupted)
	}
}

impl From<io::Result<ExitStatus>> for ExitResult {
	fn from(status: io::Result<ExitStatus>) -> Self {
		match status {
			Ok(status) => status.into(),
			Err(err) => Self::SpawnError(Arc::new(err)),
		}
	}
}

impl From<ExitStatus> for ExitResult {
	#[cfg(unix)]
	fn from(status: ExitStatus) -> Self {
		use std::os::unix::process::ExitStatusExt;

		match (status.code(), status.signal()) {
			(Some(code), _) => Self::ExitCode(code),
			(None, Some(signal)) => Self::SignalKilled(signal),
			(None, None) => Self::ExitCode(0),
		}
	}

	#[cfg(not(unix))]
	fn from(status: ExitStatus) -> Self {
		Self::ExitCode(status.code().unwrap_or(1))
	}
}

impl fmt::Display for ExitResult {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Interrupted => write!(f, "stopped"),
			Self::ExitCode(code) => write!(f, "exit status {code}"),
			Self::SignalKilled(signal) => write!(f, "killed by signal {signal}"),
			Self::SpawnError(err) => write!(f, "lost track of process: {err}"),
		}
	}
}

/// The currently running supervised process.
///
/// Created by [`ProcessRunner::start()`]. It is consumed when its exit has been observed, either
/// from [`ProcessRunner::stop()`] or [`ProcessRunner::next_exit()`].
#[derive(Debug)]
pub struct ProcessHandle {
	id: u64,
	pid: Option<u32>,
	kill: CancellationToken,
}

impl ProcessHandle {
	/// The handle's generation within the session, starting at 1.
	#[must_use]
	pub const fn id(&self) -> u64 {
		self.id
	}

	/// The OS process id, if it was known at start.
	#[must_use]
	pub const fn pid(&self) -> Option<u32> {
		self.pid
	}
}

#[cfg(test)]
impl ProcessHandle {
	/// A handle with no process behind it.
	pub(crate) fn detached(id: u64) -> Self {
		Self {
			id,
			pid: None,
			kill: CancellationToken::new(),
		}
	}
}

/// An exit notification from a process's waiter task.
#[derive(Debug)]
pub struct Exit {
	/// Which handle this is for.
	pub id: u64,

	/// What `wait()` returned.
	pub status: io::Result<ExitStatus>,
}

impl Exit {
	/// Whether this notification belongs to the handle.
	#[must_use]
	pub const fn is_for(&self, handle: &ProcessHandle) -> bool {
		self.id == handle.id
	}
}

/// Builds and runs the supervised program.
///
/// The runner owns a temporary directory that the build writes its binary into; it is removed
/// when the runner is dropped.
#[derive(Debug)]
pub struct ProcessRunner {
	program: PathBuf,
	workdir: PathBuf,
	build_flags: Vec<String>,
	runtime_args: Vec<String>,
	env: Vec<(String, String)>,
	grace: Duration,
	output: Output,

	artifact: PathBuf,
	_artifact_dir: TempDir,

	exit_s: mpsc::Sender<Exit>,
	exit_r: mpsc::Receiver<Exit>,
	generation: u64,
	reaper: CancellationToken,
}

impl ProcessRunner {
	/// Prepare a runner for the session.
	///
	/// This checks the build flags and creates the temporary output directory; it doesn't build
	/// anything yet.
	pub fn new(config: &SessionConfig) -> Result<Self, CriticalError> {
		config.validate_build_flags()?;

		let artifact_dir = tempfile::Builder::new()
			.prefix("gowatch")
			.tempdir()
			.map_err(|err| CriticalError::IoError {
				about: "creating the build output directory",
				err,
			})?;
		let artifact = artifact_dir
			.path()
			.join(format!("__gowatch{}", std::env::consts::EXE_SUFFIX));
		debug!(?artifact, "build output location");

		let (exit_s, exit_r) = mpsc::channel(1);
		Ok(Self {
			program: config.build_program.clone(),
			workdir: config.workdir.clone(),
			build_flags: config.build_flags.clone(),
			runtime_args: config.runtime_args.clone(),
			env: config.env.clone(),
			grace: config.stop_timeout,
			output: config.output.clone(),
			artifact,
			_artifact_dir: artifact_dir,
			exit_s,
			exit_r,
			generation: 0,
			reaper: CancellationToken::new(),
		})
	}

	/// Where the build writes the binary.
	#[must_use]
	pub fn artifact(&self) -> &Path {
		&self.artifact
	}

	/// Run the build to completion.
	///
	/// Output goes to the configured [`Output`]. If the session is dropped mid-build, the build
	/// is killed.
	pub async fn build(&self) -> Result<&Path, RuntimeError> {
		let launch_error = |err| RuntimeError::BuildLaunch {
			program: self.program.clone(),
			err,
		};

		let mut output_flag = OsString::from("-o=");
		output_flag.push(&self.artifact);

		let (stdout, stderr) = self.output.stdio().map_err(launch_error)?;
		let mut command = Command::new(&self.program);
		command
			.arg("build")
			.arg(output_flag)
			.args(&self.build_flags)
			.current_dir(&self.workdir)
			.stdout(stdout)
			.stderr(stderr)
			.kill_on_drop(true);

		debug!(?command, "running build");
		let status = command.status().await.map_err(launch_error)?;

		trace!(?status, "build finished");
		if status.success() {
			Ok(&self.artifact)
		} else {
			Err(RuntimeError::Build {
				program: self.program.clone(),
				status,
			})
		}
	}

	/// Start the built binary.
	///
	/// Returns as soon as the process is launched. A background task waits for it, and posts its
	/// [`Exit`] for [`next_exit()`](Self::next_exit) or [`stop()`](Self::stop) to pick up.
	pub fn start(&mut self) -> Result<ProcessHandle, RuntimeError> {
		let spawn_error = |err| RuntimeError::Spawn {
			path: self.artifact.clone(),
			err,
		};

		let (stdout, stderr) = self.output.stdio().map_err(spawn_error)?;
		let mut command = Command::new(&self.artifact);
		command
			.args(&self.runtime_args)
			.envs(self.env.iter().map(|(k, v)| (k, v)))
			.current_dir(&self.workdir)
			.stdout(stdout)
			.stderr(stderr)
			.kill_on_drop(true);

		debug!(?command, "starting process");
		let mut child = command.spawn().map_err(spawn_error)?;

		self.generation += 1;
		let id = self.generation;
		let pid = child.id();
		let exits = self.exit_s.clone();

		let kill = self.reaper.child_token();
		let waiter_kill = kill.clone();

		tokio::spawn(async move {
			let status = tokio::select! {
				status = child.wait() => status,
				() = waiter_kill.cancelled() => {
					trace!(id, "killing process");
					if let Err(err) = child.start_kill() {
						debug!(id, %err, "kill failed, process probably gone already");
					}
					child.wait().await
				}
			};

			trace!(id, ?status, "process ended");
			exits.send(Exit { id, status }).await.ok();
		});

		debug!(id, ?pid, "process started");
		Ok(ProcessHandle { id, pid, kill })
	}

	/// Wait for the next exit notification.
	///
	/// This is cancel-safe, and is how the supervisor notices a process ending on its own.
	pub async fn next_exit(&mut self) -> Exit {
		match self.exit_r.recv().await {
			Some(exit) => exit,
			// the runner holds a sender, so the channel is never closed
			None => std::future::pending().await,
		}
	}

	async fn wait_for(&mut self, handle: &ProcessHandle) -> Exit {
		loop {
			let exit = self.next_exit().await;
			if exit.is_for(handle) {
				return exit;
			}

			trace!(id = exit.id, current = handle.id, "discarding exit of a previous process");
		}
	}

	/// Ask the process to stop, and wait for it to do so.
	///
	/// The wait ends when:
	/// - the process exits, returning [`ExitResult::Interrupted`], or how it actually ended if
	///   it was already gone when the interrupt was sent;
	/// - `cancel` fires, returning [`RuntimeError::Cancelled`] with the process left as it is;
	/// - the grace period runs out, in which case the process is killed and waited for.
	pub async fn stop(
		&mut self,
		handle: &ProcessHandle,
		cancel: &CancellationToken,
	) -> Result<ExitResult, RuntimeError> {
		let delivered = Self::interrupt(handle)?;
		let grace = self.grace;

		let exit = tokio::select! {
			() = cancel.cancelled() => {
				debug!(id = handle.id, "stop cancelled while waiting for exit");
				return Err(RuntimeError::Cancelled);
			}
			exit = self.wait_for(handle) => exit,
			() = sleep(grace) => {
				warn!(id = handle.id, ?grace, "process did not stop in time, killing it");
				Self::kill(handle);
				self.wait_for(handle).await
			}
		};

		Ok(Self::stopped(delivered, exit))
	}

	/// Stop the process for good.
	///
	/// Like [`stop()`](Self::stop), but not cancellable: this is what runs once the session has
	/// been cancelled, and it only returns once the process is gone.
	pub async fn shutdown(&mut self, handle: &ProcessHandle) -> ExitResult {
		let delivered = match Self::interrupt(handle) {
			Ok(delivered) => delivered,
			Err(err) => {
				warn!(%err, "could not interrupt process, killing it instead");
				Self::kill(handle);
				true
			}
		};

		let grace = self.grace;
		let exit = tokio::select! {
			exit = self.wait_for(handle) => exit,
			() = sleep(grace) => {
				warn!(id = handle.id, ?grace, "process did not stop in time, killing it");
				Self::kill(handle);
				self.wait_for(handle).await
			}
		};

		Self::stopped(delivered, exit)
	}

	fn stopped(delivered: bool, exit: Exit) -> ExitResult {
		trace!(id = exit.id, status = ?exit.status, delivered, "stopped");
		if delivered {
			ExitResult::Interrupted
		} else {
			exit.status.into()
		}
	}

	/// Send the interrupt. Returns false if the process was already gone.
	#[cfg(unix)]
	fn interrupt(handle: &ProcessHandle) -> Result<bool, RuntimeError> {
		use nix::{
			errno::Errno,
			sys::signal::{kill, Signal},
			unistd::Pid,
		};

		let Some(pid) = handle.pid else {
			return Ok(false);
		};

		let raw = i32::try_from(pid).map_err(|_| RuntimeError::Stop {
			pid,
			err: io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"),
		})?;

		debug!(id = handle.id, pid, "interrupting process");
		match kill(Pid::from_raw(raw), Signal::SIGINT) {
			Ok(()) => Ok(true),
			Err(Errno::ESRCH) => {
				debug!(id = handle.id, pid, "process already gone");
				Ok(false)
			}
			Err(errno) => Err(RuntimeError::Stop {
				pid,
				err: errno.into(),
			}),
		}
	}

	// There's no interrupt to send outside of unix, so stopping is always a kill.
	#[cfg(not(unix))]
	#[allow(clippy::unnecessary_wraps)]
	fn interrupt(handle: &ProcessHandle) -> Result<bool, RuntimeError> {
		Self::kill(handle);
		Ok(true)
	}

	fn kill(handle: &ProcessHandle) {
		debug!(id = handle.id, pid = ?handle.pid, "killing process");
		handle.kill.cancel();
	}
}

impl Drop for ProcessRunner {
	fn drop(&mut self) {
		// kills every process this runner started that is still around
		self.reaper.cancel();
	}
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
	use std::os::unix::process::ExitStatusExt;

	use super::*;

	#[test]
	fn exit_codes() {
		assert!(matches!(
			ExitResult::from(ExitStatus::from_raw(0)),
			ExitResult::ExitCode(0)
		));
		assert!(matches!(
			ExitResult::from(ExitStatus::from_raw(3 << 8)),
			ExitResult::ExitCode(3)
		));
	}

	#[test]
	fn killed_by_signal() {
		assert!(matches!(
			ExitResult::from(ExitStatus::from_raw(9)),
			ExitResult::SignalKilled(9)
		));
	}

	#[test]
	fn wait_errors() {
		let exit = ExitResult::from(Err::<ExitStatus, _>(io::Error::new(io::ErrorKind::Other, "gone")));
		assert!(matches!(exit, ExitResult::SpawnError(_)));
		assert_eq!(exit.to_string(), "lost track of process: gone");
	}

	#[test]
	fn output_flags_are_refused() {
		for flag in ["-o", "--o", "-o=bin/server", "--o=bin/server"] {
			let config = SessionConfig {
				build_flags: vec!["-race".into(), flag.into()],
				..SessionConfig::default()
			};
			assert!(
				matches!(ProcessRunner::new(&config), Err(CriticalError::Config(_))),
				"{flag} should be refused"
			);
		}
	}

	#[test]
	fn artifact_lives_in_its_own_directory() {
		let runner = ProcessRunner::new(&SessionConfig::default()).unwrap();
		let artifact = runner.artifact().to_path_buf();
		assert!(artifact.parent().unwrap().is_dir());
		drop(runner);
		assert!(!artifact.parent().unwrap().exists());
	}
}
