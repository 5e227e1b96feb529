#![allow(dead_code)]

use std::{
	fs::{self, OpenOptions},
	io::Write,
	path::{Path, PathBuf},
	time::Duration,
};

use gowatch::{
	config::{Hooks, SessionConfig},
	error::CriticalError,
	process::ExitResult,
};
use nix::{sys::signal::kill, unistd::Pid};
use tempfile::TempDir;
use tokio::{
	sync::mpsc::{unbounded_channel, UnboundedReceiver},
	task::JoinHandle,
	time::{sleep, timeout, Instant},
};
use tokio_util::sync::CancellationToken;

/// How long to wait for anything the session is expected to do.
pub const PATIENCE: Duration = Duration::from_secs(10);

/// What the session reported through its hooks.
#[derive(Debug, Clone)]
pub enum Seen {
	Changed(PathBuf),
	Started,
	Exited(ExitResult),
	Failed(String),
	Log(String),
}

/// A scratch Go project with a fake toolchain.
///
/// The "build program" is `sh` running a script named `build`, so the session's
/// `<program> build -o=<output> <flags>` invocation lands in the script with `$1` being the
/// output flag. The script logs each build, fails while a marker file exists, and otherwise
/// writes a program that records its pid and arguments, and exits cleanly on SIGINT unless
/// `STUBBORN` is set in its environment. Both print a line to stdout.
pub struct Project {
	pub root: TempDir,
	pub scratch: TempDir,
}

impl Project {
	pub fn new() -> Self {
		let root = tempfile::tempdir().unwrap();
		let scratch = tempfile::tempdir().unwrap();

		fs::write(root.path().join("main.go"), "package main\n").unwrap();
		fs::write(root.path().join("main_test.go"), "package main\n").unwrap();

		let project = Self { root, scratch };
		fs::write(
			project.root.path().join("build"),
			format!(
				r#"
set -e
echo "$*" >> '{log}'
echo 'fake build output'
if [ -e '{fail}' ]; then
	echo 'fake build failure' >&2
	exit 2
fi
out="${{1#-o=}}"
cat > "$out" <<'PROGRAM'
#!/bin/sh
echo "$*" >> '{args}'
echo 'fake program output'
echo $$ >> '{pids}'
if [ -n "$STUBBORN" ]; then trap '' INT; else trap 'exit 0' INT; fi
while true; do sleep 0.05; done
PROGRAM
if [ ! -e '{noexec}' ]; then chmod +x "$out"; fi
"#,
				log = project.build_log().display(),
				fail = project.fail_marker().display(),
				pids = project.pid_file().display(),
				args = project.args_file().display(),
				noexec = project.noexec_marker().display(),
			),
		)
		.unwrap();

		project
	}

	pub fn path(&self, name: &str) -> PathBuf {
		self.root.path().join(name)
	}

	fn build_log(&self) -> PathBuf {
		self.scratch.path().join("builds.log")
	}

	fn pid_file(&self) -> PathBuf {
		self.scratch.path().join("pids")
	}

	fn args_file(&self) -> PathBuf {
		self.scratch.path().join("args")
	}

	fn fail_marker(&self) -> PathBuf {
		self.scratch.path().join("fail")
	}

	fn noexec_marker(&self) -> PathBuf {
		self.scratch.path().join("noexec")
	}

	/// A file in the scratch directory, outside of the watched tree.
	pub fn scratch_file(&self, name: &str) -> PathBuf {
		self.scratch.path().join(name)
	}

	/// A config for this project, and the receiving end of everything its hooks see.
	pub fn config(&self) -> (SessionConfig, UnboundedReceiver<Seen>) {
		let (tx, rx) = unbounded_channel();
		let (changed, started, exited, log) = (tx.clone(), tx.clone(), tx.clone(), tx);

		let hooks = Hooks::default()
			.on_file_change(move |path| {
				changed.send(Seen::Changed(path.to_path_buf())).ok();
			})
			.on_process_start(move || {
				started.send(Seen::Started).ok();
			})
			.on_process_exit(move |result| {
				exited
					.send(match result {
						Ok(exit) => Seen::Exited(exit.clone()),
						Err(err) => Seen::Failed(err.to_string()),
					})
					.ok();
			})
			.log_to(move |message| {
				log.send(Seen::Log(message.to_owned())).ok();
			});

		let config = SessionConfig {
			workdir: self.root.path().to_path_buf(),
			build_program: "sh".into(),
			stop_timeout: Duration::from_secs(2),
			hooks,
			..SessionConfig::default()
		};

		(config, rx)
	}

	/// The build invocations so far, one line of arguments each.
	pub fn builds(&self) -> Vec<String> {
		fs::read_to_string(self.build_log())
			.map(|log| log.lines().map(ToOwned::to_owned).collect())
			.unwrap_or_default()
	}

	/// Pids of every program started so far, oldest first.
	pub fn pids(&self) -> Vec<i32> {
		fs::read_to_string(self.pid_file())
			.map(|pids| pids.lines().filter_map(|l| l.trim().parse().ok()).collect())
			.unwrap_or_default()
	}

	/// The arguments each program was started with, one line each.
	pub fn program_args(&self) -> Vec<String> {
		fs::read_to_string(self.args_file())
			.map(|args| args.lines().map(ToOwned::to_owned).collect())
			.unwrap_or_default()
	}

	/// Poll until the program has recorded `n` pids, and return the last one.
	pub async fn nth_pid(&self, n: usize) -> i32 {
		timeout(PATIENCE, async {
			loop {
				let pids = self.pids();
				if pids.len() >= n {
					return pids[n - 1];
				}
				sleep(Duration::from_millis(20)).await;
			}
		})
		.await
		.expect("program never recorded its pid")
	}

	pub fn break_build(&self) {
		fs::write(self.fail_marker(), "").unwrap();
	}

	/// Make builds produce a program that can't be executed.
	pub fn break_artifact(&self) {
		fs::write(self.noexec_marker(), "").unwrap();
	}

	pub fn fix_build(&self) {
		fs::remove_file(self.fail_marker()).unwrap();
	}

	/// Append to a file with a single write.
	pub fn append(&self, name: &str) {
		let mut file = OpenOptions::new()
			.append(true)
			.open(self.path(name))
			.unwrap();
		file.write_all(b"// edited\n").unwrap();
	}
}

/// A session running in the background.
pub struct Session {
	pub cancel: CancellationToken,
	pub handle: JoinHandle<Result<(), CriticalError>>,
}

impl Session {
	pub fn start(config: SessionConfig) -> Self {
		let cancel = CancellationToken::new();
		let handle = tokio::spawn(gowatch::run(config, cancel.clone()));
		Self { cancel, handle }
	}

	pub async fn finish(self) -> Result<(), CriticalError> {
		self.cancel.cancel();
		timeout(PATIENCE, self.handle)
			.await
			.expect("session did not end in time")
			.expect("session task panicked")
	}
}

/// Wait for the first hook report matching the predicate, skipping others.
pub async fn expect(rx: &mut UnboundedReceiver<Seen>, what: impl Fn(&Seen) -> bool) -> Seen {
	timeout(PATIENCE, async {
		loop {
			let seen = rx.recv().await.expect("hooks channel closed");
			if what(&seen) {
				return seen;
			}
		}
	})
	.await
	.expect("expected hook report never came")
}

/// Collect everything reported within the window, apart from log lines.
pub async fn quiet_for(rx: &mut UnboundedReceiver<Seen>, window: Duration) -> Vec<Seen> {
	let deadline = Instant::now() + window;
	let mut seen = Vec::new();
	loop {
		let left = deadline.saturating_duration_since(Instant::now());
		match timeout(left, rx.recv()).await {
			Ok(Some(Seen::Log(_))) => {}
			Ok(Some(report)) => seen.push(report),
			Ok(None) | Err(_) => break,
		}
	}
	seen
}

pub fn is_alive(pid: i32) -> bool {
	kill(Pid::from_raw(pid), None).is_ok()
}

pub async fn wait_dead(pid: i32) {
	timeout(PATIENCE, async {
		while is_alive(pid) {
			sleep(Duration::from_millis(20)).await;
		}
	})
	.await
	.expect("process still alive");
}

pub fn canonical(path: &Path) -> PathBuf {
	path.canonicalize().unwrap()
}
