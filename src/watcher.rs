//! The change source: a subscription to filesystem events for a watch set.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::{
	error::{CriticalError, FsWatcherError, RuntimeError},
	paths::WatchSet,
	pathop::ChangeEvent,
};

const EVENT_CHANNEL_SIZE: usize = 1024;
const ERROR_CHANNEL_SIZE: usize = 64;

/// What kind of filesystem watcher to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Watcher {
	/// The Notify-recommended watcher on the platform.
	///
	/// For platforms Notify supports, that's a [native implementation][notify::RecommendedWatcher],
	/// for others it's polling with a default interval.
	#[default]
	Native,

	/// Notify’s [poll watcher][notify::PollWatcher] with a custom interval.
	Poll(Duration),
}

impl Watcher {
	fn create(
		self,
		f: impl notify::EventHandler,
	) -> Result<Box<dyn notify::Watcher + Send>, CriticalError> {
		use notify::{Config, Watcher as _};

		match self {
			Self::Native => {
				notify::RecommendedWatcher::new(f, Config::default()).map(|w| Box::new(w) as _)
			}
			Self::Poll(delay) => {
				notify::PollWatcher::new(f, Config::default().with_poll_interval(delay))
					.map(|w| Box::new(w) as _)
			}
		}
		.map_err(|err| CriticalError::WatcherInit {
			kind: self,
			err: err.into(),
		})
	}
}

/// A live subscription to the changes of every path in a [`WatchSet`].
///
/// The underlying OS watches are held for as long as the subscription lives, and released when
/// it is dropped.
pub struct Subscription {
	kind: Watcher,
	_watcher: Box<dyn notify::Watcher + Send>,

	/// Change events, in the order the OS reported them.
	pub events: mpsc::Receiver<ChangeEvent>,

	/// Errors from the watcher itself. None of these are fatal.
	pub errors: mpsc::Receiver<RuntimeError>,
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("kind", &self.kind)
			.finish_non_exhaustive()
	}
}

impl Subscription {
	/// Create a watcher and register every path of the watch set with it.
	///
	/// If any single path cannot be registered, the whole subscription fails.
	pub fn new(kind: Watcher, watchset: &WatchSet) -> Result<Self, CriticalError> {
		debug!(?kind, files = watchset.len(), "creating subscription");

		let (ev_s, events) = mpsc::channel(EVENT_CHANNEL_SIZE);
		let (er_s, errors) = mpsc::channel(ERROR_CHANNEL_SIZE);

		let mut watcher = kind.create(move |nev: Result<notify::Event, notify::Error>| {
			trace!(event = ?nev, "receiving possible event from watcher");
			match nev {
				Ok(nev) => {
					for path in &nev.paths {
						match ev_s.try_send(ChangeEvent::new(path, nev.kind)) {
							Ok(()) => {}
							Err(TrySendError::Full(ev)) => {
								trace!(event = ?ev, "event channel full, dropping event");
							}
							Err(TrySendError::Closed(_)) => {
								trace!("event channel closed, subscription is going away");
							}
						}
					}
				}
				Err(err) => {
					er_s.try_send(RuntimeError::Subscription(err)).ok();
				}
			}
		})?;

		for path in watchset.iter() {
			trace!(?path, "adding path to the watcher");
			watcher
				.watch(path, notify::RecursiveMode::NonRecursive)
				.map_err(|err| {
					warn!(?path, ?err, "notify watch() error");
					CriticalError::WatchRegistration {
						path: path.to_path_buf(),
						err: FsWatcherError::from(err),
					}
				})?;
		}

		debug!("all paths registered");
		Ok(Self {
			kind,
			_watcher: watcher,
			events,
			errors,
		})
	}

	/// The kind of watcher backing this subscription.
	#[must_use]
	pub const fn kind(&self) -> Watcher {
		self.kind
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		debug!(kind = ?self.kind, "releasing subscription");
	}
}

#[cfg(test)]
mod tests {
	use std::{fs, time::Duration};

	use tokio::time::timeout;
	use tracing_test::traced_test;

	use super::*;

	#[tokio::test]
	async fn missing_path_fails_registration() {
		let dir = tempfile::tempdir().unwrap();
		let ghost = dir.path().join("ghost.go");
		let set = WatchSet::from_iter([ghost.clone()]);

		match Subscription::new(Watcher::Native, &set) {
			Err(CriticalError::WatchRegistration { path, .. }) => assert_eq!(path, ghost),
			other => panic!("expected a registration error, got {other:?}"),
		}
	}

	#[tokio::test]
	#[traced_test]
	async fn writes_come_through() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("main.go");
		fs::write(&file, "package main\n").unwrap();
		let file = file.canonicalize().unwrap();

		let mut sub = Subscription::new(Watcher::Native, &WatchSet::from_iter([file.clone()]))
			.unwrap();
		fs::write(&file, "package main\n\nfunc main() {}\n").unwrap();

		let write = timeout(Duration::from_secs(5), async {
			loop {
				let ev = sub.events.recv().await.expect("subscription closed");
				if ev.is_write() {
					break ev;
				}
			}
		})
		.await
		.expect("no write event within 5s");
		assert_eq!(write.path, file);
		assert!(logs_contain("all paths registered"));
	}
}
