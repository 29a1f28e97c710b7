//! A game directory mods are installed to, together with its registry of installed packages.

use std::path::{Path, PathBuf};

use serde::*;

use crate::metadb::package::*;

pub mod filetracker;
pub mod transaction;

pub use filetracker::FileOwnershipRegistry;
pub use filetracker::InstalledPackage;

const REGISTRY_FILE: &str = "registry.bin";
const INSTANCE_FILE: &str = "instance.bin";

#[derive(Debug, thiserror::Error)]
pub enum GameInstanceError {
	#[error("required files missing: {0}")]
	RequiredFilesMissing(std::io::Error),
}

/// Per instance settings, everything but the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceSettings {
	name: String,
	game_dir: PathBuf,
	compatible_versions: VersionCriteria,
	install_filters: Vec<String>,
	reserved_dirs: Vec<String>,
	auto_removable_dirs: Vec<String>,
}

/// A single install (instance) of a game.
///
/// Each instance owns its registry, separate instances can be worked on independently but a
/// single instance must only see one install or uninstall at a time.
#[derive(Debug)]
pub struct GameInstance {
	settings: InstanceSettings,
	data_dir: PathBuf,
	registry: FileOwnershipRegistry,
}

impl GameInstance {
	/// Creates a new instance for the game at `game_root_directory`, storing its data in `data_dir`.
	pub fn new(name: impl Into<String>, game_root_directory: impl AsRef<Path>, data_dir: impl Into<PathBuf>) -> Result<GameInstance, GameInstanceError> {
		let game_root_directory = game_root_directory.as_ref();
		std::fs::metadata(game_root_directory).map_err(GameInstanceError::RequiredFilesMissing)?; // Gives the user more info compared to using `game_root_directory.exists()`

		log::info!("Created new game instance at path {}", game_root_directory.display());

		Ok(GameInstance {
			settings: InstanceSettings {
				name: name.into(),
				game_dir: game_root_directory.to_path_buf(),
				compatible_versions: Default::default(),
				install_filters: Default::default(),
				reserved_dirs: [
					"", "GameData", "Ships", "Ships/VAB", "Ships/SPH", "Ships/@thumbs",
					"Ships/@thumbs/VAB", "Ships/@thumbs/SPH", "Ships/Script", "Missions", "Scenarios", "Tutorial",
				].into_iter().map(String::from).collect(),
				auto_removable_dirs: vec!["@thumbs".to_string()],
			},
			data_dir: data_dir.into(),
			registry: Default::default(),
		})
	}

	/// Loads an instance previously written with [`GameInstance::save_to_disk`].
	pub fn load_from_disk(data_dir: impl Into<PathBuf>) -> crate::Result<GameInstance> {
		let data_dir = data_dir.into();
		log::trace!("Loading game instance from {}", data_dir.display());
		let settings: InstanceSettings = bincode::deserialize(&std::fs::read(data_dir.join(INSTANCE_FILE))?)?;
		let registry = match std::fs::read(data_dir.join(REGISTRY_FILE)) {
			Ok(data) => bincode::deserialize(&data)?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileOwnershipRegistry::default(),
			Err(e) => return Err(e.into()),
		};
		Ok(GameInstance { settings, data_dir, registry })
	}

	/// Writes the instance settings and registry.
	pub fn save_to_disk(&self) -> crate::Result<()> {
		write_atomically(&self.data_dir.join(INSTANCE_FILE), &bincode::serialize(&self.settings)?)?;
		self.save_registry(false)
	}

	/// Writes the registry to durable storage.
	///
	/// # Parameters
	/// - `enforce_consistency` - Refuse to write a registry with conflicting packages or unmet dependencies.
	///
	/// # Errors
	/// [`Error::Inconsistent`](crate::Error::Inconsistent) when enforcing and the registry is inconsistent.
	pub fn save_registry(&self, enforce_consistency: bool) -> crate::Result<()> {
		Self::write_registry(&self.data_dir, &self.registry, enforce_consistency)
	}

	pub(crate) fn write_registry(data_dir: &Path, registry: &FileOwnershipRegistry, enforce_consistency: bool) -> crate::Result<()> {
		if enforce_consistency {
			registry.check_consistency().map_err(crate::Error::Inconsistent)?;
		}
		log::trace!("Saving registry to {}", data_dir.display());
		write_atomically(&data_dir.join(REGISTRY_FILE), &bincode::serialize(registry)?)
	}

	pub fn name(&self) -> &str {
		&self.settings.name
	}

	pub fn game_dir(&self) -> &Path {
		&self.settings.game_dir
	}

	pub fn data_dir(&self) -> &Path {
		&self.data_dir
	}

	pub fn registry(&self) -> &FileOwnershipRegistry {
		&self.registry
	}

	/// Records a DLC found in the game directory, it owns no files and is never removed by us.
	pub fn register_dlc(&mut self, package: Package) -> Result<(), filetracker::RegistryError> {
		if !package.is_dlc() {
			return Err(filetracker::RegistryError::NotDlc(package.identifier))
		}
		log::info!("Found DLC {}", package.identifier);
		self.registry.register_package(package, Vec::new(), false)
	}

	pub(crate) fn replace_registry(&mut self, registry: FileOwnershipRegistry) {
		self.registry = registry;
	}

	pub fn version_criteria(&self) -> &VersionCriteria {
		&self.settings.compatible_versions
	}
	pub fn set_compatible_versions(&mut self, versions: impl IntoIterator<Item = GameVersion>) {
		self.settings.compatible_versions = VersionCriteria::new(versions);
	}

	/// Destinations containing any of these substrings are never installed to this instance.
	pub fn install_filters(&self) -> &[String] {
		&self.settings.install_filters
	}
	pub fn set_install_filters(&mut self, filters: Vec<String>) {
		self.settings.install_filters = filters;
	}

	/// Names of folders the game fills by itself, their contents don't keep a directory from being removed.
	pub fn auto_removable_dirs(&self) -> &[String] {
		&self.settings.auto_removable_dirs
	}
	pub fn set_auto_removable_dirs(&mut self, dirs: Vec<String>) {
		self.settings.auto_removable_dirs = dirs;
	}

	/// Checks the path against the directories that must never be removed.
	pub fn is_reserved_directory(&self, path: &Path) -> bool {
		match path.strip_prefix(self.game_dir()) {
			Ok(relative) => {
				let relative = filetracker::normalize_path(relative);
				self.settings.reserved_dirs.iter().any(|r| r.eq_ignore_ascii_case(&relative))
			},
			/* Anything outside the game directory is off limits */
			Err(_) => true,
		}
	}

	/// Converts a registry path into an absolute path.
	pub fn to_absolute(&self, relative: &str) -> PathBuf {
		self.game_dir().join(relative)
	}
}

pub(crate) fn write_atomically(path: &Path, data: &[u8]) -> crate::Result<()> {
	let parent = path.parent().unwrap_or_else(|| Path::new("."));
	std::fs::create_dir_all(parent)?;
	let mut temp = tempfile::NamedTempFile::new_in(parent)?;
	std::io::Write::write_all(&mut temp, data)?;
	temp.persist(path).map_err(|e| e.error)?;
	Ok(())
}
