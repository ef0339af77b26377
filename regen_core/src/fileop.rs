use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::UNIX_EPOCH;

use crate::RegenError;
use crate::RegenResult;

/// Storage used to read previous output and persist generated files.
///
/// `write_file` only queues content. Nothing is persisted until `commit`,
/// which returns the paths whose content actually changed.
pub trait FileOperation: Debug + Send + Sync {
	/// Read the current content of `path`, or `None` when it does not exist.
	fn read_file(&self, path: &Path) -> RegenResult<Option<String>>;
	/// Queue `content` to be written to `path`.
	fn write_file(&self, path: &Path, content: &str) -> RegenResult<()>;
	/// Persist all queued writes.
	fn commit(&self) -> RegenResult<Vec<PathBuf>>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_from_disk(path: &Path) -> RegenResult<Option<String>> {
	match std::fs::read_to_string(path) {
		Ok(content) => Ok(Some(content)),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(e.into()),
	}
}

/// Write through a temporary sibling file so readers never observe a
/// partially written file.
fn write_atomically(path: &Path, content: &str) -> RegenResult<()> {
	let commit_error = |e: std::io::Error| {
		RegenError::Commit {
			path: path.display().to_string(),
			reason: e.to_string(),
		}
	};

	if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
		std::fs::create_dir_all(parent).map_err(commit_error)?;
	}

	let file_name = path
		.file_name()
		.map(|name| name.to_string_lossy().to_string())
		.unwrap_or_default();
	let temp_path = path.with_file_name(format!(
		".{file_name}.tmp-{}-{}",
		std::process::id(),
		std::time::SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map_or(0, |duration| duration.as_nanos())
	));

	std::fs::write(&temp_path, content).map_err(commit_error)?;
	if let Err(e) = std::fs::rename(&temp_path, path) {
		let _ = std::fs::remove_file(&temp_path);
		return Err(commit_error(e));
	}

	Ok(())
}

/// Plain filesystem storage.
#[derive(Debug, Default)]
pub struct FsFileOperation {
	pending: Mutex<BTreeMap<PathBuf, String>>,
}

impl FsFileOperation {
	pub fn new() -> Self {
		Self::default()
	}
}

impl FileOperation for FsFileOperation {
	fn read_file(&self, path: &Path) -> RegenResult<Option<String>> {
		read_from_disk(path)
	}

	fn write_file(&self, path: &Path, content: &str) -> RegenResult<()> {
		lock(&self.pending).insert(path.to_path_buf(), content.to_string());
		Ok(())
	}

	fn commit(&self) -> RegenResult<Vec<PathBuf>> {
		let pending = std::mem::take(&mut *lock(&self.pending));
		let mut changed = Vec::new();

		for (path, content) in pending {
			if read_from_disk(&path)?.as_deref() == Some(content.as_str()) {
				tracing::debug!(path = %path.display(), "unchanged");
				continue;
			}

			write_atomically(&path, &content)?;
			tracing::debug!(path = %path.display(), "written");
			changed.push(path);
		}

		Ok(changed)
	}
}

/// In-memory storage, useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryFileOperation {
	files: Mutex<BTreeMap<PathBuf, String>>,
	pending: Mutex<BTreeMap<PathBuf, String>>,
}

impl MemoryFileOperation {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed a file.
	pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
		lock(&self.files).insert(path.into(), content.into());
	}

	/// The committed content of `path`.
	pub fn get(&self, path: impl AsRef<Path>) -> Option<String> {
		lock(&self.files).get(path.as_ref()).cloned()
	}

	/// All committed paths in sorted order.
	pub fn paths(&self) -> Vec<PathBuf> {
		lock(&self.files).keys().cloned().collect()
	}
}

impl FileOperation for MemoryFileOperation {
	fn read_file(&self, path: &Path) -> RegenResult<Option<String>> {
		Ok(self.get(path))
	}

	fn write_file(&self, path: &Path, content: &str) -> RegenResult<()> {
		lock(&self.pending).insert(path.to_path_buf(), content.to_string());
		Ok(())
	}

	fn commit(&self) -> RegenResult<Vec<PathBuf>> {
		let pending = std::mem::take(&mut *lock(&self.pending));
		let mut files = lock(&self.files);
		let mut changed = Vec::new();

		for (path, content) in pending {
			if files.get(&path) == Some(&content) {
				continue;
			}
			files.insert(path.clone(), content);
			changed.push(path);
		}

		Ok(changed)
	}
}

/// A change that a commit would apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
	pub path: PathBuf,
	/// Current content, `None` when the file would be created.
	pub before: Option<String>,
	pub after: String,
}

/// Reads real files but never writes. `commit` records the changes it would
/// have applied, and later reads see the recorded content, so several
/// generations can be previewed in sequence before anything is persisted.
#[derive(Debug, Default)]
pub struct DryRunFileOperation {
	pending: Mutex<BTreeMap<PathBuf, String>>,
	changes: Mutex<Vec<FileChange>>,
}

impl DryRunFileOperation {
	pub fn new() -> Self {
		Self::default()
	}

	/// Changes recorded by every commit so far, one per path, in the order
	/// each path first changed.
	pub fn changes(&self) -> Vec<FileChange> {
		lock(&self.changes).clone()
	}
}

impl FileOperation for DryRunFileOperation {
	fn read_file(&self, path: &Path) -> RegenResult<Option<String>> {
		let recorded = lock(&self.changes)
			.iter()
			.find(|change| change.path == path)
			.map(|change| change.after.clone());

		match recorded {
			Some(content) => Ok(Some(content)),
			None => read_from_disk(path),
		}
	}

	fn write_file(&self, path: &Path, content: &str) -> RegenResult<()> {
		lock(&self.pending).insert(path.to_path_buf(), content.to_string());
		Ok(())
	}

	fn commit(&self) -> RegenResult<Vec<PathBuf>> {
		let pending = std::mem::take(&mut *lock(&self.pending));
		let mut changed = Vec::new();

		for (path, after) in pending {
			if self.read_file(&path)?.as_deref() == Some(after.as_str()) {
				continue;
			}

			let mut changes = lock(&self.changes);
			match changes.iter().position(|change| change.path == path) {
				// Written back to what is on disk.
				Some(index) if changes[index].before.as_deref() == Some(after.as_str()) => {
					changes.remove(index);
				}
				Some(index) => changes[index].after = after,
				None => {
					let before = read_from_disk(&path)?;
					changes.push(FileChange {
						path: path.clone(),
						before,
						after,
					});
				}
			}
			changed.push(path);
		}

		Ok(changed)
	}
}
