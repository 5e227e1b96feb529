//! Resolving the set of files to watch.

use std::{
	collections::BTreeSet,
	ffi::OsStr,
	path::{Path, PathBuf},
};

use tracing::{debug, trace};
use walkdir::{DirEntry, WalkDir};

use crate::error::{ConfigError, CriticalError};

/// The deduplicated set of absolute paths a session watches.
///
/// Computed once when the session starts; a different set of files needs a new session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchSet(BTreeSet<PathBuf>);

impl WatchSet {
	/// How many paths are in the set.
	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Whether the set is empty.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Whether the path is in the set.
	#[must_use]
	pub fn contains(&self, path: &Path) -> bool {
		self.0.contains(path)
	}

	/// Iterate over the paths, in sorted order.
	pub fn iter(&self) -> impl Iterator<Item = &Path> {
		self.0.iter().map(PathBuf::as_path)
	}
}

impl FromIterator<PathBuf> for WatchSet {
	fn from_iter<T: IntoIterator<Item = PathBuf>>(iter: T) -> Self {
		Self(iter.into_iter().collect())
	}
}

impl Extend<PathBuf> for WatchSet {
	fn extend<T: IntoIterator<Item = PathBuf>>(&mut self, iter: T) {
		self.0.extend(iter);
	}
}

/// Compute the watch set.
///
/// Each root is resolved against `workdir`; with no roots, `workdir` itself is the only root.
/// Directories are walked recursively for Go sources (`*.go`, but not `*_test.go`), skipping
/// hidden entries (including `.git`) and, unless `include_vendor` is set, `vendor`
/// directories. A root that is a file is kept if it is a Go source.
///
/// Each of the additional `patterns` is a glob, also resolved against `workdir`, and everything
/// it matches is added whatever its extension.
///
/// All paths in the result are canonical.
pub fn resolve(
	workdir: &Path,
	roots: &[PathBuf],
	patterns: &[String],
	include_vendor: bool,
) -> Result<WatchSet, CriticalError> {
	let mut set = WatchSet::default();

	let default_root = [PathBuf::from(".")];
	let roots = if roots.is_empty() {
		&default_root[..]
	} else {
		roots
	};

	for root in roots {
		let root = workdir.join(root);
		if !include_vendor && root.file_name() == Some(OsStr::new("vendor")) {
			trace!(?root, "skipping vendor root");
			continue;
		}

		debug!(?root, "walking for go files");
		let walk = WalkDir::new(&root)
			.follow_links(true)
			.into_iter()
			.filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry, include_vendor));

		for entry in walk {
			let entry = entry.map_err(|err| CriticalError::FileSet {
				path: err.path().unwrap_or(&root).to_path_buf(),
				err: err.into(),
			})?;

			if entry.file_type().is_file() && is_go_source(entry.path()) {
				set.extend([canonical(entry.path())?]);
			}
		}
	}

	for pattern in patterns {
		let full = workdir.join(pattern);
		let matches =
			glob::glob(&full.to_string_lossy()).map_err(|err| ConfigError::Pattern {
				pattern: pattern.clone(),
				err,
			})?;

		for path in matches {
			let path = path.map_err(|err| CriticalError::FileSet {
				path: err.path().to_path_buf(),
				err: err.into(),
			})?;
			trace!(?pattern, ?path, "pattern match");
			set.extend([canonical(&path)?]);
		}
	}

	debug!(files = set.len(), "resolved watch set");
	Ok(set)
}

fn canonical(path: &Path) -> Result<PathBuf, CriticalError> {
	path.canonicalize().map_err(|err| CriticalError::FileSet {
		path: path.to_path_buf(),
		err,
	})
}

fn is_skipped(entry: &DirEntry, include_vendor: bool) -> bool {
	let name = entry.file_name().to_string_lossy();
	name.starts_with('.') || (!include_vendor && entry.file_type().is_dir() && name == "vendor")
}

fn is_go_source(path: &Path) -> bool {
	path.extension() == Some(OsStr::new("go"))
		&& !path
			.file_name()
			.is_some_and(|name| name.to_string_lossy().ends_with("_test.go"))
}
