//! All-or-nothing filesystem mutation.
//!
//! Every change made through a [`FileTransaction`] is journaled after the prior state of the
//! path has been copied into a private shadow directory. Rolling back replays the journal in
//! reverse, restoring each path. Committing simply forgets the journal.

use std::path::{Path, PathBuf};

/// A scope in which filesystem changes can be undone as a whole.
pub trait ScopedMutation {
	/// Records the current state of `path` so it can be restored on rollback.
	fn snapshot(&mut self, path: &Path) -> std::io::Result<()>;
	/// Keeps every change made within the scope.
	fn commit(self) where Self: Sized;
	/// Restores the state of every snapshotted path.
	fn rollback(self) -> std::io::Result<()> where Self: Sized;
}

#[derive(Debug)]
enum JournalEntry {
	/// The path held a file, a copy is kept at `shadow`.
	File { path: PathBuf, shadow: PathBuf },
	/// Nothing existed at the path.
	Absent(PathBuf),
	/// The directory was created within this transaction.
	CreatedDir(PathBuf),
	/// The empty directory was removed within this transaction.
	RemovedDir(PathBuf),
}

/// Copy-before-write implementation of [`ScopedMutation`].
///
/// Dropping a transaction that wasn't committed rolls it back.
#[derive(Debug)]
pub struct FileTransaction {
	shadow_dir: tempfile::TempDir,
	journal: Vec<JournalEntry>,
	finished: bool,
}

impl FileTransaction {
	pub fn new() -> std::io::Result<Self> {
		let shadow_dir = tempfile::Builder::new().prefix("modpm-transaction").tempdir()?;
		log::trace!("Opened transaction with shadow directory {}", shadow_dir.path().display());
		Ok(Self {
			shadow_dir,
			journal: Default::default(),
			finished: false,
		})
	}

	/// Creates `dir` and any missing parents, recording each one created.
	pub fn create_dir_all(&mut self, dir: &Path) -> std::io::Result<()> {
		let mut missing = Vec::<PathBuf>::new();
		let mut current = Some(dir);
		while let Some(d) = current {
			if d.as_os_str().is_empty() || d.exists() { break; }
			missing.push(d.to_path_buf());
			current = d.parent();
		}

		for d in missing.into_iter().rev() {
			std::fs::create_dir(&d)?;
			self.journal.push(JournalEntry::CreatedDir(d));
		}
		Ok(())
	}

	/// Writes the contents of `reader` to `path`, creating parent directories as needed.
	///
	/// Returns the number of bytes written.
	pub fn write_file(&mut self, path: &Path, reader: &mut dyn std::io::Read) -> std::io::Result<u64> {
		let mut file = self.create_file(path)?;
		std::io::copy(reader, &mut file)
	}

	/// Creates or truncates the file at `path` for writing, creating parent directories as needed.
	pub fn create_file(&mut self, path: &Path) -> std::io::Result<std::fs::File> {
		if let Some(parent) = path.parent() {
			self.create_dir_all(parent)?;
		}
		self.snapshot(path)?;
		std::fs::File::create(path)
	}

	/// Deletes the file at `path`, the journal keeps a copy.
	pub fn delete_file(&mut self, path: &Path) -> std::io::Result<()> {
		self.snapshot(path)?;
		if let Err(e) = std::fs::remove_file(path) {
			/* The snapshot is still valid, the file is untouched */
			self.discard_last();
			return Err(e)
		}
		Ok(())
	}

	/// Removes an empty directory.
	pub fn remove_dir(&mut self, dir: &Path) -> std::io::Result<()> {
		std::fs::remove_dir(dir)?;
		self.journal.push(JournalEntry::RemovedDir(dir.to_path_buf()));
		Ok(())
	}

	fn discard_last(&mut self) {
		if let Some(JournalEntry::File { shadow, .. }) = self.journal.pop() {
			let _ = std::fs::remove_file(shadow);
		}
	}

	fn undo(&mut self) -> std::io::Result<()> {
		let mut first_error: Option<std::io::Error> = None;
		while let Some(entry) = self.journal.pop() {
			let result = match &entry {
				JournalEntry::File { path, shadow } => std::fs::copy(shadow, path).map(|_| ()),
				JournalEntry::Absent(path) => match std::fs::remove_file(path) {
					Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
					r => r,
				},
				JournalEntry::CreatedDir(dir) => match std::fs::remove_dir(dir) {
					Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
					r => r,
				},
				JournalEntry::RemovedDir(dir) => std::fs::create_dir_all(dir),
			};
			if let Err(e) = result {
				log::warn!("Failed to undo {:?}: {}", entry, e);
				first_error.get_or_insert(e);
			}
		}
		first_error.map_or(Ok(()), Err)
	}
}

impl ScopedMutation for FileTransaction {
	fn snapshot(&mut self, path: &Path) -> std::io::Result<()> {
		match std::fs::symlink_metadata(path) {
			Ok(meta) if meta.is_file() => {
				let shadow = self.shadow_dir.path().join(self.journal.len().to_string());
				std::fs::copy(path, &shadow)?;
				self.journal.push(JournalEntry::File { path: path.to_path_buf(), shadow });
			},
			Ok(_) => return Err(std::io::Error::new(std::io::ErrorKind::Other, format!("{} is not a regular file", path.display()))),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				self.journal.push(JournalEntry::Absent(path.to_path_buf()));
			},
			Err(e) => return Err(e),
		}
		Ok(())
	}

	fn commit(mut self) {
		log::trace!("Committing transaction with {} changes", self.journal.len());
		self.journal.clear();
		self.finished = true;
	}

	fn rollback(mut self) -> std::io::Result<()> {
		log::info!("Rolling back transaction with {} changes", self.journal.len());
		self.finished = true;
		self.undo()
	}
}

impl Drop for FileTransaction {
	fn drop(&mut self) {
		if !self.finished && !self.journal.is_empty() {
			log::warn!("Transaction dropped without commit, rolling back");
			if let Err(e) = self.undo() {
				log::warn!("Rollback incomplete: {}", e);
			}
		}
	}
}
