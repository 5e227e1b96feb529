//! The supervisor: the session entry point and its control loop.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
	config::{Hooks, SessionConfig},
	error::{CriticalError, RuntimeError},
	paths,
	pathop::ChangeEvent,
	process::{Exit, ExitResult, ProcessHandle, ProcessRunner},
	watcher::Subscription,
};

/// Run a session until it is cancelled.
///
/// This resolves the files to watch, builds and starts the program, and from then on restarts
/// it every time one of those files is written to. Failing builds, crashes, and the like are
/// reported through the [`Hooks`] and do not end the session; only problems found while setting
/// up do, along with `cancel` firing, which stops the program and returns
/// [`CriticalError::Cancelled`].
///
/// With [`SessionConfig::print_files`] set, the resolved files are printed one per line and the
/// session returns `Ok(())` straight away.
pub async fn run(config: SessionConfig, cancel: CancellationToken) -> Result<(), CriticalError> {
	debug!(?config, "starting session");
	config.validate_build_flags()?;

	let watchset = paths::resolve(
		&config.workdir,
		&config.watch_dirs,
		&config.file_patterns,
		config.include_vendor,
	)?;

	if config.print_files {
		for path in watchset.iter() {
			println!("{}", path.display());
		}
		return Ok(());
	}

	if watchset.is_empty() {
		warn!(workdir = ?config.workdir, "no files to watch");
	}

	let runner = ProcessRunner::new(&config)?;
	let subscription = Subscription::new(config.file_watcher, &watchset)?;
	info!(files = watchset.len(), "watching");

	Supervisor {
		hooks: config.hooks,
		runner,
		subscription,
		cancel,
		state: State::Idle,
		active: None,
	}
	.main()
	.await
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
	Idle,
	Building,
	Running,
	Stopping,
}

/// Owns everything about a session once it's set up.
///
/// All decisions are made on the one task running [`main()`](Self::main), and each is carried to
/// completion before the next event is looked at. That alone keeps two processes from ever
/// being alive at once.
struct Supervisor {
	hooks: Hooks,
	runner: ProcessRunner,
	subscription: Subscription,
	cancel: CancellationToken,
	state: State,
	active: Option<ProcessHandle>,
}

impl Supervisor {
	async fn main(mut self) -> Result<(), CriticalError> {
		if let Err(err) = self.start().await {
			self.report("error starting binary", &err);
		}

		loop {
			if self.cancel.is_cancelled() {
				return Err(self.shutdown().await);
			}

			trace!(state = ?self.state, "waiting for events");
			tokio::select! {
				() = self.cancel.cancelled() => {
					return Err(self.shutdown().await);
				}
				Some(event) = self.subscription.events.recv() => {
					self.on_change(event).await;
				}
				Some(err) = self.subscription.errors.recv() => {
					warn!(%err, "watcher error");
					self.hooks.log(&format!("watcher error: {err}"));
				}
				exit = self.runner.next_exit() => {
					self.on_exit(exit);
				}
			}
		}
	}

	fn transition(&mut self, to: State) {
		debug!(from = ?self.state, ?to, "state transition");
		self.state = to;
	}

	async fn on_change(&mut self, event: ChangeEvent) {
		if !event.is_write() {
			trace!(?event, "ignoring non-write event");
			return;
		}

		info!(path = ?event.path, "modified file");
		self.hooks.file_changed(&event.path);
		self.hooks
			.log(&format!("modified file: {}", event.path.display()));

		match self.restart().await {
			Ok(()) => {}
			Err(RuntimeError::Cancelled) => {
				debug!("restart interrupted by cancellation");
			}
			Err(err) => self.report("error restarting binary", &err),
		}
	}

	fn on_exit(&mut self, exit: Exit) {
		match self.active.as_ref().map(ProcessHandle::id) {
			Some(current) if current == exit.id => {
				self.active = None;
				self.transition(State::Idle);
			}
			Some(current) => {
				debug!(id = exit.id, current, "ignoring exit of a previous process");
				return;
			}
			None => {}
		}

		let result = ExitResult::from(exit.status);
		warn!(id = exit.id, %result, "process exited unexpectedly");
		self.hooks
			.log(&format!("process exited unexpectedly: {result}"));
		self.hooks.process_exited(Ok(&result));
	}

	async fn restart(&mut self) -> Result<(), RuntimeError> {
		self.stop().await?;
		self.start().await
	}

	async fn start(&mut self) -> Result<(), RuntimeError> {
		self.transition(State::Building);
		if let Err(err) = self.runner.build().await {
			self.transition(State::Idle);
			return Err(err);
		}

		match self.runner.start() {
			Ok(handle) => {
				info!(id = handle.id(), pid = ?handle.pid(), "process started");
				self.active = Some(handle);
				self.transition(State::Running);
				self.hooks.process_started();
				Ok(())
			}
			Err(err) => {
				self.transition(State::Idle);
				Err(err)
			}
		}
	}

	async fn stop(&mut self) -> Result<(), RuntimeError> {
		let Some(handle) = self.active.take() else {
			return Ok(());
		};

		self.transition(State::Stopping);
		match self.runner.stop(&handle, &self.cancel).await {
			Ok(exit) => {
				self.transition(State::Idle);
				if exit.is_interrupted() {
					debug!(id = handle.id(), "process stopped");
				} else {
					// it ended on its own just before we asked
					warn!(id = handle.id(), %exit, "process exited unexpectedly");
					self.hooks
						.log(&format!("process exited unexpectedly: {exit}"));
					self.hooks.process_exited(Ok(&exit));
				}
				Ok(())
			}
			Err(err) => {
				self.active = Some(handle);
				self.transition(State::Running);
				Err(err)
			}
		}
	}

	async fn shutdown(&mut self) -> CriticalError {
		info!("session cancelled, shutting down");
		let exit = match self.active.take() {
			Some(handle) => {
				self.transition(State::Stopping);
				let exit = self.runner.shutdown(&handle).await;
				debug!(id = handle.id(), %exit, "process shut down");
				Some(exit)
			}
			None => None,
		};

		self.transition(State::Idle);
		CriticalError::Cancelled { exit }
	}

	fn report(&self, context: &str, err: &RuntimeError) {
		error!(%err, "{context}");
		self.hooks.log(&format!("{context}: {err}"));
		self.hooks.process_exited(Err(err));
	}
}
