//! Downloaded package archives kept between operations.
//!
//! Archives are stored flat in the cache directory as `{key}-{description}` where `key` is the
//! first 8 characters of the upper case SHA-256 of the download locator. Recency is tracked with a
//! counter in `index.json` so the least recently used archives go first when the cache is trimmed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::*;

use crate::game_instance::FileOwnershipRegistry;
use crate::metadb::package::Package;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
	locator: String,
	file_name: String,
	size: u64,
	last_used: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
	tick: u64,
	/// Keyed by slot key.
	entries: BTreeMap<String, CacheEntry>,
}

impl CacheIndex {
	fn touch(&mut self, key: &str) {
		self.tick += 1;
		if let Some(entry) = self.entries.get_mut(key) {
			entry.last_used = self.tick;
		}
	}
}

pub struct ContentCache {
	dir: PathBuf,
	index: CacheIndex,
}

impl ContentCache {
	/// Opens the cache at `dir`, creating it when missing.
	///
	/// Index entries whose archive has been deleted behind our back are dropped.
	pub fn open(dir: impl Into<PathBuf>) -> crate::Result<Self> {
		let dir = dir.into();
		std::fs::create_dir_all(&dir)?;

		let mut index = match std::fs::read(dir.join(INDEX_FILE)) {
			Ok(data) => serde_json::from_slice::<CacheIndex>(&data)?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheIndex::default(),
			Err(e) => return Err(e.into()),
		};
		index.entries.retain(|_, e| dir.join(&e.file_name).is_file());

		log::trace!("Opened content cache at {} with {} entries", dir.display(), index.entries.len());
		Ok(Self { dir, index })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn slot_key(locator: &str) -> String {
		sha256::digest(locator)[..8].to_uppercase()
	}

	/// Copies `source` into the cache under `locator`, replacing any previous archive for it.
	pub fn store(&mut self, locator: &str, source: &Path) -> crate::Result<PathBuf> {
		let key = Self::slot_key(locator);
		let description = source.file_name()
			.map(|n| n.to_string_lossy().replace(['/', '\\'], "_"))
			.unwrap_or_else(|| "archive".to_string());
		let file_name = format!("{key}-{description}");
		let path = self.dir.join(&file_name);

		if let Some(previous) = self.index.entries.get(&key) {
			if previous.file_name != file_name {
				remove_if_present(&self.dir.join(&previous.file_name))?;
			}
		}

		if source != path {
			std::fs::copy(source, &path)?;
		}
		let size = std::fs::metadata(&path)?.len();

		log::info!("Cached {} as {}", locator, file_name);
		self.index.entries.insert(key.clone(), CacheEntry { locator: locator.to_string(), file_name, size, last_used: 0 });
		self.index.touch(&key);
		self.save_index()?;
		Ok(path)
	}

	/// Path of the archive cached for `locator`, marking it as recently used.
	pub fn retrieve(&mut self, locator: &str) -> Option<PathBuf> {
		let key = Self::slot_key(locator);
		let path = self.dir.join(&self.index.entries.get(&key)?.file_name);
		if !path.is_file() {
			log::warn!("Cached archive {} is missing", path.display());
			self.index.entries.remove(&key);
			return None
		}
		self.index.touch(&key);
		if let Err(e) = self.save_index() {
			log::warn!("Failed to update cache index: {}", e);
		}
		Some(path)
	}

	pub fn is_cached(&self, locator: &str) -> bool {
		self.index.entries.get(&Self::slot_key(locator))
			.map(|e| self.dir.join(&e.file_name).is_file())
			.unwrap_or(false)
	}

	/// Checks every download locator of the package, first hit wins.
	pub fn is_package_cached(&self, package: &Package) -> bool {
		package.download.iter().any(|l| self.is_cached(l))
	}

	pub fn package_cached(&mut self, package: &Package) -> Option<PathBuf> {
		let locator = package.download.iter().find(|l| self.is_cached(l))?.clone();
		self.retrieve(&locator)
	}

	pub fn remove(&mut self, locator: &str) -> crate::Result<bool> {
		let Some(entry) = self.index.entries.remove(&Self::slot_key(locator)) else { return Ok(false) };
		remove_if_present(&self.dir.join(entry.file_name))?;
		self.save_index()?;
		Ok(true)
	}

	pub fn total_size(&self) -> u64 {
		self.index.entries.values().map(|e| e.size).sum()
	}

	/// Evicts least recently used archives until the cache is at most `max_bytes`.
	///
	/// Archives of packages installed in `registry` are never evicted, so the cache may stay over
	/// the limit. Returns the locators evicted.
	pub fn enforce_size_limit(&mut self, max_bytes: u64, registry: &FileOwnershipRegistry) -> crate::Result<Vec<String>> {
		let protected = registry.installed_packages()
			.flat_map(|i| i.package().download.iter())
			.map(|l| Self::slot_key(l))
			.collect::<std::collections::HashSet<_>>();

		let mut candidates = self.index.entries.iter()
			.filter(|(key, _)| !protected.contains(*key))
			.map(|(key, e)| (e.last_used, key.clone()))
			.collect::<Vec<_>>();
		candidates.sort();

		let mut total = self.total_size();
		let mut evicted = Vec::<String>::new();
		for (_, key) in candidates {
			if total <= max_bytes { break; }
			if let Some(entry) = self.index.entries.remove(&key) {
				log::trace!("Evicting {} from cache", entry.locator);
				remove_if_present(&self.dir.join(&entry.file_name))?;
				total -= entry.size;
				evicted.push(entry.locator);
			}
		}

		if !evicted.is_empty() {
			log::info!("Evicted {} archives from cache", evicted.len());
			self.save_index()?;
		}
		Ok(evicted)
	}

	fn save_index(&self) -> crate::Result<()> {
		crate::game_instance::write_atomically(&self.dir.join(INDEX_FILE), &serde_json::to_vec_pretty(&self.index)?)
	}
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
	match std::fs::remove_file(path) {
		Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn archive(dir: &Path, name: &str, size: usize) -> PathBuf {
		let path = dir.join(name);
		std::fs::write(&path, vec![0u8; size]).unwrap();
		path
	}

	#[test]
	fn slot_key_is_short_upper_hex() {
		let key = ContentCache::slot_key("https://example.com/a.zip");
		assert_eq!(key.len(), 8);
		assert_eq!(key, key.to_uppercase());
	}

	#[test]
	fn stored_archives_are_retrieved() {
		let src = tempfile::tempdir().unwrap();
		let dir = tempfile::tempdir().unwrap();
		let mut cache = ContentCache::open(dir.path()).unwrap();
		let stored = cache.store("https://example.com/a.zip", &archive(src.path(), "A-1.0.zip", 10)).unwrap();
		assert!(stored.file_name().unwrap().to_string_lossy().ends_with("-A-1.0.zip"));
		assert_eq!(cache.retrieve("https://example.com/a.zip"), Some(stored));
		assert_eq!(cache.retrieve("https://example.com/b.zip"), None);
	}

	#[test]
	fn index_survives_reopen() {
		let src = tempfile::tempdir().unwrap();
		let dir = tempfile::tempdir().unwrap();
		ContentCache::open(dir.path()).unwrap().store("a", &archive(src.path(), "a.zip", 10)).unwrap();
		let cache = ContentCache::open(dir.path()).unwrap();
		assert!(cache.is_cached("a"));
		assert_eq!(cache.total_size(), 10);
	}

	#[test]
	fn least_recently_used_is_evicted_first() {
		let src = tempfile::tempdir().unwrap();
		let dir = tempfile::tempdir().unwrap();
		let mut cache = ContentCache::open(dir.path()).unwrap();
		cache.store("a", &archive(src.path(), "a.zip", 10)).unwrap();
		cache.store("b", &archive(src.path(), "b.zip", 10)).unwrap();
		cache.retrieve("a");

		let evicted = cache.enforce_size_limit(15, &Default::default()).unwrap();
		assert_eq!(evicted, ["b".to_string()]);
		assert!(cache.is_cached("a"));
	}

	#[test]
	fn installed_archives_are_never_evicted() {
		let src = tempfile::tempdir().unwrap();
		let dir = tempfile::tempdir().unwrap();
		let mut cache = ContentCache::open(dir.path()).unwrap();
		cache.store("a", &archive(src.path(), "a.zip", 10)).unwrap();

		let mut package = Package::new("A", "1.0");
		package.download = vec!["a".to_string()];
		let mut registry = FileOwnershipRegistry::default();
		registry.register_package(package, Vec::new(), false).unwrap();

		assert!(cache.enforce_size_limit(0, &registry).unwrap().is_empty());
		assert!(cache.is_cached("a"));
	}
}
