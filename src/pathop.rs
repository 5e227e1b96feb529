//! Change events, as seen by the supervisor.

use std::path::{Path, PathBuf};

use notify::event::{EventKind, MetadataKind, ModifyKind};

/// A path and what happened to it, as reported by the filesystem watcher.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ChangeEvent {
	/// The path the event is about.
	pub path: PathBuf,

	/// The raw kind of the notify event.
	pub kind: EventKind,
}

impl ChangeEvent {
	/// Make a change event from a path and notify event kind.
	pub fn new(path: &Path, kind: EventKind) -> Self {
		Self {
			path: path.to_path_buf(),
			kind,
		}
	}

	/// Whether the contents of the file were written.
	///
	/// Only writes cause a rebuild. Creates, removes, renames, and permission changes are
	/// observed but ignored.
	#[must_use]
	pub const fn is_write(&self) -> bool {
		is_write(self.kind)
	}
}

/// Whether a notify event kind describes a write to a file's contents.
///
/// The poll watcher can only see modification times, so a write-time metadata change counts as
/// a write too. Closing a file after writing it is not one: the write itself was already seen.
#[must_use]
pub const fn is_write(kind: EventKind) -> bool {
	matches!(
		kind,
		EventKind::Modify(
			ModifyKind::Any
				| ModifyKind::Data(_)
				| ModifyKind::Metadata(MetadataKind::WriteTime)
		)
	)
}
