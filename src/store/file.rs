//! File-backed [`SlotStore`] for CLI and desktop clients that outlive one process.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
	process,
	sync::LazyLock,
};
// self
use crate::{
	_prelude::*,
	store::{CompareAndSwapOutcome, SlotStore, StoreError},
};

type Slots = HashMap<String, String>;

/// One lock per backing file, shared by every handle opened on it in this process.
static FILE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>> =
	LazyLock::new(Default::default);

/// Persists slots to a JSON file.
///
/// The file is the source of truth: every read loads it, and every mutation re-reads it, changes
/// the single slot, and atomically replaces it. Handles opened on the same path in one process
/// (including through different spellings of the path) serialize through one lock, so they see
/// and preserve each other's writes. Other processes' writes are observed on the next read, but
/// read-modify-write is not atomic across processes.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	guard: Arc<RwLock<()>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, validating any existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = Self::resolve(path.into())?;

		Self::load_snapshot(&path)?;

		let guard = FILE_LOCKS.lock().entry(path.clone()).or_default().clone();

		Ok(Self { path, guard })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn resolve(path: PathBuf) -> Result<PathBuf, StoreError> {
		Self::ensure_parent_exists(&path)?;

		let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
			return Ok(path);
		};
		let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
		let parent = fs::canonicalize(parent).map_err(|e| StoreError::Backend {
			message: format!("Failed to resolve store directory {}: {e}", parent.display()),
		})?;

		Ok(parent.join(name))
	}

	fn load_snapshot(path: &Path) -> Result<Slots, StoreError> {
		if !path.exists() {
			return Ok(HashMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(HashMap::new());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	/// Loads the file, applies `change`, and persists when it reports a modification.
	///
	/// Callers must hold the write side of `guard`.
	fn update_locked<T>(
		&self,
		change: impl FnOnce(&mut Slots) -> (T, bool),
	) -> Result<T, StoreError> {
		let mut slots = Self::load_snapshot(&self.path)?;
		let (value, modified) = change(&mut slots);

		if modified {
			self.persist_locked(&slots)?;
		}

		Ok(value)
	}

	fn persist_locked(&self, contents: &Slots) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		// Per-process temporary name so concurrent writers never share a staging file.
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension(format!("{}.tmp", process::id()));

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl SlotStore for FileStore {
	fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		let _read = self.guard.read();

		Ok(Self::load_snapshot(&self.path)?.remove(key))
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		let _write = self.guard.write();

		self.update_locked(|slots| {
			let previous = slots.insert(key.to_owned(), value.to_owned());

			((), previous.as_deref() != Some(value))
		})
	}

	fn remove(&self, key: &str) -> Result<(), StoreError> {
		let _write = self.guard.write();

		self.update_locked(|slots| ((), slots.remove(key).is_some()))
	}

	fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&str>,
		replacement: Option<&str>,
	) -> Result<CompareAndSwapOutcome, StoreError> {
		let _write = self.guard.write();

		self.update_locked(|slots| {
			if slots.get(key).map(String::as_str) != expected {
				return (CompareAndSwapOutcome::Mismatch, false);
			}

			match replacement {
				Some(value) => slots.insert(key.to_owned(), value.to_owned()),
				None => slots.remove(key),
			};

			(CompareAndSwapOutcome::Updated, true)
		})
	}
}
