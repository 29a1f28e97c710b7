//! # Installation
//!
//! Applies resolved plans to a game instance.
//!
//! [`ModuleInstaller`] installs and removes packages as single all-or-nothing operations. Every
//! change to the game directory goes through one [`FileTransaction`](crate::game_instance::transaction::FileTransaction)
//! per operation and the registry is only replaced once the changes are committed, so a failure at
//! any point leaves both the directory and the registry as they were.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::game_instance::GameInstance;
use crate::game_instance::filetracker::RegistryError;
use crate::metadb::PackageCatalog;
use crate::metadb::package::PackageIdentifier;
use crate::relationship_resolver::{OptionalRelationship, ResolutionError};

pub mod content;
pub mod deployment;
pub mod download;
pub mod progress;
mod installer;
mod uninstaller;

use content::ContentCache;
use progress::{ByteRateProgress, Prompt};

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
	#[error("{0}")]
	Resolution(#[from] ResolutionError),
	/// DLC can be detected but never installed or removed by us.
	#[error("{0} is a DLC and can't be managed")]
	Forbidden(PackageIdentifier),
	#[error("not enough free space, {required} bytes required but {available} available")]
	InsufficientSpace {
		required: u64,
		available: u64,
	},
	#[error("{0} is not installed")]
	NotInstalled(String),
	#[error("{0} has no replacement available")]
	NoReplacement(PackageIdentifier),
	#[error("no archive available for {0}")]
	ArchiveMissing(PackageIdentifier),
	#[error("{0} has no files to install")]
	NoInstallableFiles(PackageIdentifier),
	/// The destination is owned by another installed package.
	#[error("{path} from {claimant} is already installed by {owner}")]
	FileExists {
		path: String,
		owner: String,
		claimant: PackageIdentifier,
	},
	/// The destination exists, belongs to no package and differs from the file to install.
	#[error("{path} from {package} already exists and doesn't belong to any package")]
	ForeignFileConflict {
		package: PackageIdentifier,
		path: String,
	},
	#[error("download of {package} failed: {error}")]
	Download {
		package: PackageIdentifier,
		error: download::DownloadError,
	},
	#[error("deployment error: {0}")]
	Deployment(#[from] deployment::DeploymentError),
	#[error("registry error: {0}")]
	Registry(#[from] RegistryError),
	#[error("failed to persist changes: {0}")]
	Persistence(#[from] crate::Error),
	#[error("install cancelled")]
	Cancelled,
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("zip error: {0}")]
	Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, thiserror::Error)]
pub enum UninstallError {
	#[error("{0} is not installed")]
	NotInstalled(String),
	#[error("{0} is a DLC and can't be managed")]
	Forbidden(PackageIdentifier),
	/// Some files couldn't be deleted, everything else was removed and committed.
	#[error("{} files could not be removed", locked.len())]
	PartialFailure {
		locked: Vec<String>,
		report: UninstallReport,
	},
	#[error("uninstall cancelled")]
	Cancelled,
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("failed to persist registry: {0}")]
	Registry(#[from] crate::Error),
}

#[derive(Debug, Clone, Default)]
pub struct InstallReport {
	/// Packages installed, in install order.
	pub installed: Vec<PackageIdentifier>,
	/// Already installed targets that are now considered explicitly installed.
	pub reselected: Vec<PackageIdentifier>,
	/// Installed versions removed in favour of a newer version.
	pub superseded: Vec<PackageIdentifier>,
	/// Packages removed in favour of their replacement.
	pub replaced: Vec<PackageIdentifier>,
	/// Files skipped by install filters.
	pub filtered_files: usize,
	/// Cache locators evicted after the install.
	pub evicted: Vec<String>,
	pub optional: Vec<OptionalRelationship>,
}

#[derive(Debug, Clone, Default)]
pub struct UninstallReport {
	/// Packages removed, dependents first.
	pub removed: Vec<PackageIdentifier>,
	/// Directories kept because of files no package owns, worth a look by the user.
	pub possible_leftover_dirs: Vec<PathBuf>,
}

type FreeSpaceCheck<'a> = Box<dyn Fn(&Path) -> std::io::Result<u64> + 'a>;

/// Installs and removes packages on a single game instance.
///
/// # Usage
/// ```ignore
/// let mut installer = ModuleInstaller::new(&mut instance, &catalog, &mut cache, &config)
/// 	.on_progress(|p| println!("{} bytes left", p.bytes_left));
/// let report = installer.install_list(targets, &Default::default(), Some(&downloader)).await?;
/// ```
pub struct ModuleInstaller<'a> {
	instance: &'a mut GameInstance,
	catalog: &'a dyn PackageCatalog,
	cache: &'a mut ContentCache,
	config: &'a crate::Config,
	cancel: CancellationToken,
	/// No user to ask, questions that need a real answer fail the operation.
	headless: bool,
	progress: Box<dyn FnMut(&ByteRateProgress) + 'a>,
	confirm: Box<dyn FnMut(&Prompt) -> bool + 'a>,
	free_space: FreeSpaceCheck<'a>,
}

impl<'a> ModuleInstaller<'a> {
	pub fn new(instance: &'a mut GameInstance, catalog: &'a dyn PackageCatalog, cache: &'a mut ContentCache, config: &'a crate::Config) -> Self {
		Self {
			instance,
			catalog,
			cache,
			config,
			cancel: CancellationToken::new(),
			headless: true,
			progress: Box::new(|_: &ByteRateProgress| {}),
			confirm: Box::new(|_: &Prompt| true),
			free_space: Box::new(|path: &Path| fs2::available_space(path)),
		}
	}

	pub fn headless(mut self, headless: bool) -> Self {
		self.headless = headless;
		self
	}

	pub fn on_progress(mut self, progress: impl FnMut(&ByteRateProgress) + 'a) -> Self {
		self.progress = Box::new(progress);
		self
	}

	/// Answers each [`Prompt`], every prompt is answered yes when not set.
	pub fn on_confirm(mut self, confirm: impl FnMut(&Prompt) -> bool + 'a) -> Self {
		self.confirm = Box::new(confirm);
		self
	}

	/// Replaces the free space check of the game directory.
	pub fn free_space_check(mut self, check: impl Fn(&Path) -> std::io::Result<u64> + 'a) -> Self {
		self.free_space = Box::new(check);
		self
	}

	pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
		self.cancel = token;
		self
	}

	pub fn instance(&self) -> &GameInstance {
		self.instance
	}
}
