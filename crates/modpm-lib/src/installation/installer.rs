//! The install path of [`ModuleInstaller`].

use std::collections::{HashMap, HashSet};

use super::*;
use super::deployment::{ArchiveReader, DeploymentError, InstallableFile, ZipArchiveReader};
use super::download::{DownloadEvent, Downloader};
use crate::game_instance::FileOwnershipRegistry;
use crate::game_instance::transaction::{FileTransaction, ScopedMutation};
use crate::metadb::package::{Package, PackageIdentifier};
use crate::relationship_resolver::{PlannedPackage, RelationshipResolverOptions, ResolvedPlan, ResolverBuilder};

impl<'a> ModuleInstaller<'a> {
	/// Resolves and installs `targets` with everything they need.
	///
	/// # Process
	/// 1. Targets already installed at the same version are only marked as explicitly installed.
	/// 1. The targets are resolved, DLC and a lack of free space stop the install.
	/// 1. The user confirms the install through [`Prompt::ContinueInstall`].
	/// 1. Superseded versions are removed, then packages are installed in plan order as their
	/// archives become available, cached archives first and downloads as they complete.
	/// 1. The registry is saved and the changes committed.
	///
	/// Any error rolls back every change made to the game directory.
	///
	/// # Parameters
	/// - `downloader` - Fetches archives that aren't cached, without one every archive must be cached.
	pub async fn install_list(&mut self, targets: Vec<Package>, options: &RelationshipResolverOptions, downloader: Option<&dyn Downloader>) -> Result<InstallReport, InstallError> {
		let mut registry = self.instance.registry().clone();
		let mut report = InstallReport::default();

		let mut requested = Vec::<Package>::new();
		for target in targets {
			if registry.installed_version(&target.identifier.identifier) == Some(&target.identifier.version) {
				log::info!("{} is already installed", target.identifier);
				registry.set_auto_installed(&target.identifier.identifier, false);
				report.reselected.push(target.identifier);
			} else {
				requested.push(target);
			}
		}

		if requested.is_empty() {
			if !report.reselected.is_empty() {
				GameInstance::write_registry(self.instance.data_dir(), &registry, false)?;
				self.instance.replace_registry(registry);
			}
			return Ok(report)
		}

		self.execute(registry, requested, Vec::new(), options, downloader, report).await
	}

	/// Uninstalls each package and installs the package named by its `replaced_by` in the same operation.
	///
	/// Packages depending on a replaced package are kept, the replacement is expected to provide it.
	///
	/// # Errors
	/// - [`InstallError::NotInstalled`] if an identifier isn't installed.
	/// - [`InstallError::NoReplacement`] if the catalog has no replacement for an installed package.
	/// - Everything [`ModuleInstaller::install_list`] can fail with.
	pub async fn replace_list(&mut self, identifiers: &[String], options: &RelationshipResolverOptions, downloader: Option<&dyn Downloader>) -> Result<InstallReport, InstallError> {
		let registry = self.instance.registry().clone();
		let catalog = self.catalog;

		let mut replaced = Vec::<PackageIdentifier>::new();
		let mut requested = Vec::<Package>::new();
		for id in identifiers {
			let installed = registry.installed_package(id).ok_or_else(|| InstallError::NotInstalled(id.clone()))?;
			if installed.package().is_dlc() {
				return Err(InstallError::Forbidden(installed.identifier().clone()))
			}
			let replacement = catalog.replacement(id).ok_or_else(|| InstallError::NoReplacement(installed.identifier().clone()))?;
			log::info!("Replacing {} with {}", installed.identifier(), replacement.identifier);
			replaced.push(installed.identifier().clone());
			requested.push(replacement.clone());
		}

		self.execute(registry, requested, replaced, options, downloader, InstallReport::default()).await
	}

	/// Resolves `requested` with `replaced` treated as gone, then applies the plan in one transaction.
	async fn execute(
		&mut self,
		mut registry: FileOwnershipRegistry,
		requested: Vec<Package>,
		replaced: Vec<PackageIdentifier>,
		options: &RelationshipResolverOptions,
		downloader: Option<&dyn Downloader>,
		mut report: InstallReport,
	) -> Result<InstallReport, InstallError> {
		let options = RelationshipResolverOptions { allow_inconsistencies: false, ..options.clone() };
		let plan = ResolverBuilder::new(self.catalog, &registry)
			.requested(requested)
			.exclude(replaced.iter().map(|r| r.identifier.clone()))
			.version_criteria(self.instance.version_criteria().clone())
			.options(options)
			.build()
			.resolve()
			.into_result()?;

		if let Some(dlc) = plan.packages().iter().find(|p| p.package.is_dlc()) {
			return Err(InstallError::Forbidden(dlc.package.identifier.clone()))
		}

		let required = plan.install_size();
		let available = (self.free_space)(self.instance.game_dir())?;
		if required > available {
			return Err(InstallError::InsufficientSpace { required, available })
		}

		let (ready, to_download): (Vec<&PlannedPackage>, Vec<&PlannedPackage>) = plan.packages().iter()
			.partition(|p| p.package.is_metapackage() || self.cache.is_package_cached(&p.package));

		if downloader.is_none() {
			if let Some(missing) = to_download.first() {
				return Err(InstallError::ArchiveMissing(missing.package.identifier.clone()))
			}
		}

		let prompt = Prompt::ContinueInstall {
			install: plan.identifiers().into_iter().cloned().collect(),
			download: to_download.iter().map(|p| p.package.identifier.clone()).collect(),
		};
		if !(self.confirm)(&prompt) {
			return Err(InstallError::Cancelled)
		}

		let download_size = to_download.iter().map(|p| p.package.download_size).sum::<u64>();
		let mut progress = ByteRateProgress::new(download_size + required);
		let available = ready.iter().map(|p| p.package.identifier.identifier.clone()).collect::<HashSet<_>>();
		let to_download = to_download.into_iter().map(|p| p.package.clone()).collect::<Vec<_>>();

		let mut txn = FileTransaction::new()?;
		let mut result = self.remove_replaced(&replaced, &mut registry, &mut txn, &mut report);
		if result.is_ok() {
			result = self.apply_install(&plan, &mut registry, &mut txn, &mut progress, available, to_download, downloader, &mut report).await;
		}
		if result.is_ok() {
			result = GameInstance::write_registry(self.instance.data_dir(), &registry, true).map_err(InstallError::from);
		}

		if let Err(e) = result {
			log::warn!("Install failed, rolling back: {}", e);
			if let Err(rollback) = txn.rollback() {
				log::warn!("Rollback incomplete: {}", rollback);
			}
			return Err(e)
		}

		txn.commit();
		self.instance.replace_registry(registry);
		report.optional = plan.optional().to_vec();

		if let Some(limit) = self.config.cache_size_limit() {
			match self.cache.enforce_size_limit(limit, self.instance.registry()) {
				Ok(evicted) => report.evicted = evicted,
				Err(e) => log::warn!("Failed to trim content cache: {}", e),
			}
		}

		log::info!("Installed {} packages", report.installed.len());
		Ok(report)
	}

	fn remove_replaced(&self, replaced: &[PackageIdentifier], registry: &mut FileOwnershipRegistry, txn: &mut FileTransaction, report: &mut InstallReport) -> Result<(), InstallError> {
		for old in replaced {
			self.remove_whole(registry, txn, old)?;
			report.replaced.push(old.clone());
		}
		Ok(())
	}

	/// Removes an installed package, failing if any of its files can't be deleted.
	fn remove_whole(&self, registry: &mut FileOwnershipRegistry, txn: &mut FileTransaction, old: &PackageIdentifier) -> Result<(), InstallError> {
		let removal = self.remove_package(registry, txn, &old.identifier).map_err(|_| InstallError::Cancelled)?;
		if let Some(locked) = removal.locked.first() {
			return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, format!("{locked} of {old} could not be removed")).into())
		}
		Ok(())
	}

	#[allow(clippy::too_many_arguments)]
	async fn apply_install(
		&mut self,
		plan: &ResolvedPlan,
		registry: &mut FileOwnershipRegistry,
		txn: &mut FileTransaction,
		progress: &mut ByteRateProgress,
		mut available: HashSet<String>,
		to_download: Vec<Package>,
		downloader: Option<&dyn Downloader>,
		report: &mut InstallReport,
	) -> Result<(), InstallError> {
		for old in plan.superseded() {
			log::info!("Removing {} before upgrade", old);
			self.remove_whole(registry, txn, old)?;
			report.superseded.push(old.clone());
		}

		let mut bytes_left = to_download.iter()
			.map(|p| (p.identifier.identifier.clone(), p.download_size))
			.collect::<HashMap<_, _>>();
		let mut events = match downloader {
			Some(downloader) if !to_download.is_empty() => Some(downloader.download_all(to_download.clone())),
			_ => None,
		};

		let mut done = HashSet::<String>::new();
		let mut waiting = plan.packages().iter().collect::<Vec<_>>();
		let cancel = self.cancel.clone();

		loop {
			self.install_ready(plan, registry, txn, progress, &available, &mut done, &mut waiting, report)?;
			if waiting.is_empty() {
				return Ok(())
			}

			let Some(rx) = events.as_mut() else {
				if let Some(missing) = waiting.iter().find(|p| !available.contains(&p.package.identifier.identifier)) {
					return Err(InstallError::ArchiveMissing(missing.package.identifier.clone()))
				}
				/* Everything is available yet nothing is ready, the remaining packages depend on each other */
				log::warn!("Dependency cycle between {} packages, installing in plan order", waiting.len());
				for planned in std::mem::take(&mut waiting) {
					self.install_package(planned, registry, txn, progress, report)?;
				}
				return Ok(())
			};

			let event = tokio::select! {
				_ = cancel.cancelled() => return Err(InstallError::Cancelled),
				event = rx.recv() => event,
			};

			match event {
				Some(DownloadEvent::Progress { package, bytes_left: left }) => {
					if let Some(previous) = bytes_left.get_mut(&package.identifier) {
						progress.advance(previous.saturating_sub(left));
						*previous = left;
					}
					progress.current = Some(package);
					(self.progress)(progress);
				},
				Some(DownloadEvent::Complete { package, path }) => {
					log::trace!("Download of {} complete", package);
					if let Some(left) = bytes_left.remove(&package.identifier) {
						progress.advance(left);
					}
					let locator = plan.get(&package.identifier)
						.and_then(|p| p.package.download.first())
						.ok_or_else(|| InstallError::ArchiveMissing(package.clone()))?;
					let cached = self.cache.store(locator, &path)?;
					if cached != path {
						if let Err(e) = std::fs::remove_file(&path) {
							log::warn!("Failed to remove downloaded archive {}: {}", path.display(), e);
						}
					}
					available.insert(package.identifier);
				},
				Some(DownloadEvent::Failed { package, error }) => {
					return Err(InstallError::Download { package, error })
				},
				None => events = None,
			}
		}
	}

	/// Installs every waiting package whose archive is available and whose dependencies are done, in plan order.
	#[allow(clippy::too_many_arguments)]
	fn install_ready(
		&mut self,
		plan: &ResolvedPlan,
		registry: &mut FileOwnershipRegistry,
		txn: &mut FileTransaction,
		progress: &mut ByteRateProgress,
		available: &HashSet<String>,
		done: &mut HashSet<String>,
		waiting: &mut Vec<&PlannedPackage>,
		report: &mut InstallReport,
	) -> Result<(), InstallError> {
		loop {
			let next = waiting.iter().position(|p| {
				available.contains(&p.package.identifier.identifier) && plan.ready_to_install(&p.package, done)
			});
			let Some(index) = next else { return Ok(()) };

			let planned = waiting.remove(index);
			self.install_package(planned, registry, txn, progress, report)?;
			done.insert(planned.package.identifier.identifier.clone());
		}
	}

	fn install_package(&mut self, planned: &PlannedPackage, registry: &mut FileOwnershipRegistry, txn: &mut FileTransaction, progress: &mut ByteRateProgress, report: &mut InstallReport) -> Result<(), InstallError> {
		let package = &planned.package;
		log::info!("Installing {} ({})", package.identifier, planned.reason);
		progress.current = Some(package.identifier.clone());

		let files = if package.is_metapackage() {
			Vec::new()
		} else {
			self.deploy_files(package, registry, txn, progress, report)?
		};

		registry.register_package(package.clone(), files, planned.is_auto_installed())?;
		report.installed.push(package.identifier.clone());
		Ok(())
	}

	/// Copies the files of the package into the game directory, returning the registry paths installed.
	fn deploy_files(&mut self, package: &Package, registry: &FileOwnershipRegistry, txn: &mut FileTransaction, progress: &mut ByteRateProgress, report: &mut InstallReport) -> Result<Vec<String>, InstallError> {
		let id = &package.identifier;
		let archive = self.cache.package_cached(package).ok_or_else(|| InstallError::ArchiveMissing(id.clone()))?;
		let mut reader = ZipArchiveReader::open(&archive)?;

		let installable = match deployment::find_installable_files(package, reader.entries()) {
			Err(DeploymentError::NothingMatched { .. }) => return Err(InstallError::NoInstallableFiles(id.clone())),
			result => result?,
		};

		let filters = self.config.global_install_filters().iter()
			.chain(self.instance.install_filters())
			.collect::<Vec<_>>();
		let (installable, filtered): (Vec<InstallableFile>, Vec<InstallableFile>) = installable.into_iter()
			.partition(|f| !filters.iter().any(|filter| f.destination.contains(filter.as_str())));
		report.filtered_files += filtered.len();

		let (dirs, files): (Vec<InstallableFile>, Vec<InstallableFile>) = installable.into_iter().partition(|f| f.is_dir);
		if files.is_empty() {
			return Err(InstallError::NoInstallableFiles(id.clone()))
		}

		/* Check every destination before touching anything */
		let mut identical = HashSet::<String>::new();
		let mut foreign = Vec::<String>::new();
		for file in dirs.iter().chain(&files) {
			if !deployment::is_enclosed(&file.destination) {
				return Err(DeploymentError::UnsafePath(file.destination.clone()).into())
			}
		}
		for file in &files {
			if let Some(owner) = registry.file_owner(&file.destination) {
				return Err(InstallError::FileExists { path: file.destination.clone(), owner: owner.to_string(), claimant: id.clone() })
			}

			let path = self.instance.to_absolute(&file.destination);
			if path.is_dir() {
				return Err(InstallError::ForeignFileConflict { package: id.clone(), path: file.destination.clone() })
			}
			if path.exists() {
				if reader.entry_matches(&file.source, &path)? {
					log::trace!("{} is already present", file.destination);
					identical.insert(file.destination.clone());
				} else {
					foreign.push(file.destination.clone());
				}
			}
		}

		if let Some(first) = foreign.first() {
			let prompt = Prompt::Overwrite { package: id.clone(), files: foreign.clone() };
			if self.headless || !(self.confirm)(&prompt) {
				return Err(InstallError::ForeignFileConflict { package: id.clone(), path: first.clone() })
			}
			for file in &foreign {
				log::info!("Overwriting {}", file);
				txn.delete_file(&self.instance.to_absolute(file))?;
			}
		}

		for dir in &dirs {
			txn.create_dir_all(&self.instance.to_absolute(&dir.destination))?;
		}

		for file in &files {
			if self.cancel.is_cancelled() {
				return Err(InstallError::Cancelled)
			}
			if identical.contains(&file.destination) {
				continue;
			}

			log::trace!("Copying {} to {}", file.source.path, file.destination);
			let mut out = txn.create_file(&self.instance.to_absolute(&file.destination))?;
			let copied = reader.copy_entry(&file.source, &mut out)?;
			progress.advance(copied);
			(self.progress)(progress);
		}

		Ok(files.into_iter().map(|f| f.destination).collect())
	}
}
