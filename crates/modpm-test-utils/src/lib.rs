//! Various helper functions for testing
//!
//! functions in this module should use results and not use any panics to avoid confusion in callers

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use modpm::game_instance::GameInstanceError;
use modpm::installation::ModuleInstaller;
use modpm::installation::content::ContentCache;
use modpm::installation::download::{DownloadError, DownloadEvent, Downloader};
use modpm::metadb::package::*;
use modpm::{Config, GameInstance, MetaDB, Package};

pub type Result<T> = std::result::Result<T, FixtureError>;

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("zip error: {0}")]
	Zip(#[from] zip::result::ZipError),
	#[error("fs_extra error: {0}")]
	FsExtra(#[from] fs_extra::error::Error),
	#[error("modpm error: {0}")]
	Modpm(#[from] modpm::Error),
	#[error("game instance error: {0}")]
	Instance(#[from] GameInstanceError),
}

/// Routes `log` output to the test harness, set `RUST_LOG` to see it.
pub fn init_logging() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// A package with plain `depends` on each of `depends`.
pub fn package(identifier: &str, version: &str, depends: &[&str]) -> Package {
	let mut p = Package::new(identifier, version);
	p.depends = depends.iter().map(|d| PackageDescriptor::any(*d).into()).collect();
	p
}

/// A package standing in for the virtual identifier `provides`.
pub fn providing(identifier: &str, provides: &str) -> Package {
	let mut p = Package::new(identifier, "1.0");
	p.provides.insert(provides.to_string());
	p
}

/// The download locator fixtures use for a package.
pub fn locator_for(id: &PackageIdentifier) -> String {
	format!("https://example.invalid/{}/{}.zip", id.identifier, id.version)
}

/// Writes a zip archive holding `files`, paths use `/` separators.
///
/// Paths ending with `/` are written as directory entries.
pub fn write_archive(path: &Path, files: &[(&str, &[u8])]) -> Result<()> {
	let mut zip = zip::ZipWriter::new(std::fs::File::create(path)?);
	let options = zip::write::FileOptions::default();
	for (name, data) in files {
		if name.ends_with('/') {
			zip.add_directory(*name, options)?;
		} else {
			zip.start_file(*name, options)?;
			zip.write_all(data)?;
		}
	}
	zip.finish()?;
	Ok(())
}

/// The state of a directory tree, used to check nothing changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirSnapshot {
	pub directories: BTreeSet<PathBuf>,
	pub files: BTreeMap<PathBuf, Vec<u8>>,
}

impl DirSnapshot {
	pub fn take(root: &Path) -> Result<Self> {
		let content = fs_extra::dir::get_dir_content(root)?;
		let relative = |p: &str| Path::new(p).strip_prefix(root).map(Path::to_path_buf).unwrap_or_else(|_| PathBuf::from(p));

		let directories = content.directories.iter().map(|d| relative(d.as_str())).collect();
		let mut files = BTreeMap::new();
		for f in &content.files {
			files.insert(relative(f.as_str()), std::fs::read(f)?);
		}
		Ok(Self { directories, files })
	}
}

/// A game instance in a temporary directory with a catalog and a content cache.
///
/// Archives added through [`Fixture::add_package`] are cached up front so installs never need a downloader.
pub struct Fixture {
	pub game_dir: tempfile::TempDir,
	pub data_dir: tempfile::TempDir,
	pub cache_dir: tempfile::TempDir,
	pub staging_dir: tempfile::TempDir,
	pub config: Config,
	pub db: MetaDB,
	pub instance: GameInstance,
	pub cache: ContentCache,
}

impl Fixture {
	pub fn new() -> Result<Self> {
		init_logging();
		let game_dir = tempfile::tempdir()?;
		let data_dir = tempfile::tempdir()?;
		let cache_dir = tempfile::tempdir()?;
		let staging_dir = tempfile::tempdir()?;
		std::fs::create_dir_all(game_dir.path().join("GameData"))?;

		let mut config = Config::default();
		config.set_download_dir(staging_dir.path().to_path_buf());
		config.set_data_dir(data_dir.path().to_path_buf());

		let instance = GameInstance::new("fixture", game_dir.path(), data_dir.path())?;
		let cache = ContentCache::open(cache_dir.path())?;

		Ok(Self {
			game_dir,
			data_dir,
			cache_dir,
			staging_dir,
			config,
			db: MetaDB::default(),
			instance,
			cache,
		})
	}

	pub fn game_path(&self) -> &Path {
		self.game_dir.path()
	}

	/// Adds the package to the catalog with an archive of `files`, cached under its locator.
	///
	/// Returns the package as added, with its download fields set.
	pub fn add_package(&mut self, package: Package, files: &[(&str, &[u8])]) -> Result<Package> {
		let package = self.stage_package(package, files)?;
		let archive = self.archive_path(&package.identifier);
		self.cache.store(&locator_for(&package.identifier), &archive)?;
		Ok(package)
	}

	/// Adds the package to the catalog with an archive that is only available through [`LocalDownloader`].
	pub fn add_uncached_package(&mut self, package: Package, files: &[(&str, &[u8])]) -> Result<Package> {
		self.stage_package(package, files)
	}

	/// Adds a package that has no archive, such as a metapackage or a DLC.
	pub fn add_bare_package(&mut self, package: Package) -> Package {
		self.db.add_package(package.clone());
		package
	}

	fn stage_package(&mut self, mut package: Package, files: &[(&str, &[u8])]) -> Result<Package> {
		let archive = self.archive_path(&package.identifier);
		write_archive(&archive, files)?;
		package.download = vec![locator_for(&package.identifier)];
		package.download_size = std::fs::metadata(&archive)?.len();
		package.install_size = files.iter().map(|(_, d)| d.len() as u64).sum();
		self.db.add_package(package.clone());
		Ok(package)
	}

	/// Where the staged archive of a package lives.
	pub fn archive_path(&self, id: &PackageIdentifier) -> PathBuf {
		self.staging_dir.path().join(format!("{}-{}.src.zip", id.identifier, id.version))
	}

	/// Latest catalog version of `identifier`.
	pub fn latest(&self, identifier: &str) -> Option<Package> {
		use modpm::PackageCatalog;
		self.db.all_versions(identifier).into_iter().next().cloned()
	}

	/// An installer for the fixture with unlimited free space.
	pub fn installer(&mut self) -> ModuleInstaller<'_> {
		ModuleInstaller::new(&mut self.instance, &self.db, &mut self.cache, &self.config)
			.free_space_check(|_: &Path| Ok(u64::MAX))
	}

	pub fn snapshot(&self) -> Result<DirSnapshot> {
		DirSnapshot::take(self.game_dir.path())
	}
}

/// Serves archives from local files, completing every download immediately.
#[derive(Debug, Default)]
pub struct LocalDownloader {
	/// Locator to archive.
	pub archives: HashMap<String, PathBuf>,
	pub staging: PathBuf,
}

impl LocalDownloader {
	/// Serves the staged archive of each package of the fixture that has a download.
	pub fn for_fixture(fixture: &Fixture) -> Self {
		use modpm::PackageCatalog;
		let archives = fixture.db.packages()
			.filter_map(|p| {
				let locator = p.download.first()?;
				Some((locator.clone(), fixture.archive_path(&p.identifier)))
			})
			.collect();
		Self { archives, staging: fixture.staging_dir.path().to_path_buf() }
	}
}

impl Downloader for LocalDownloader {
	fn download_all(&self, packages: Vec<Package>) -> tokio::sync::mpsc::UnboundedReceiver<DownloadEvent> {
		let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
		for package in packages {
			let id = package.identifier.clone();
			let event = match package.download.first().and_then(|l| self.archives.get(l)) {
				None => DownloadEvent::Failed { package: id, error: DownloadError::PackageMissingDownloadFields },
				Some(source) => {
					let target = self.staging.join(format!("{}-{}.zip", id.identifier, id.version));
					match std::fs::copy(source, &target) {
						Ok(_) => {
							let _ = tx.send(DownloadEvent::Progress { package: id.clone(), bytes_left: 0 });
							DownloadEvent::Complete { package: id, path: target }
						},
						Err(e) => DownloadEvent::Failed { package: id, error: e.into() },
					}
				},
			};
			let _ = tx.send(event);
		}
		rx
	}
}
