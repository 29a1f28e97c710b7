//! The uninstall path of [`ModuleInstaller`].

use std::collections::BTreeSet;

use super::*;
use crate::game_instance::FileOwnershipRegistry;
use crate::game_instance::filetracker::normalize_path;
use crate::game_instance::transaction::{FileTransaction, ScopedMutation};
use crate::metadb::package::Package;
use crate::relationship_resolver::dependency_order;

/// Outcome of removing a single package.
#[derive(Debug, Default)]
pub(super) struct Removal {
	/// Files that couldn't be deleted.
	pub locked: Vec<String>,
	pub leftovers: Vec<PathBuf>,
}

/// Cancellation was requested while removing.
pub(super) struct Cancelled;

impl<'a> ModuleInstaller<'a> {
	/// Removes the packages, every installed package depending on them and any auto-installed
	/// package left without a reason to be installed.
	///
	/// # Parameters
	/// - `installing` - Packages about to be installed in the same batch, their dependencies are kept.
	///
	/// # Errors
	/// Files that can't be deleted don't stop the uninstall, everything else is removed and saved
	/// then [`UninstallError::PartialFailure`] lists the files left behind. A package with such
	/// files stays installed and so do the packages it depends on.
	pub fn uninstall_list(&mut self, identifiers: &[String], installing: &[Package]) -> Result<UninstallReport, UninstallError> {
		let registry = self.instance.registry();
		for id in identifiers {
			let installed = registry.installed_package(id).ok_or_else(|| UninstallError::NotInstalled(id.clone()))?;
			if installed.package().is_dlc() {
				return Err(UninstallError::Forbidden(installed.identifier().clone()))
			}
		}

		let mut removing = registry.find_reverse_dependencies(identifiers, installing);
		let orphans = registry.find_removable_auto_installed(&removing, installing);
		removing.extend(orphans);

		let packages = removing.iter()
			.filter_map(|id| registry.installed_package(id))
			.map(|i| i.package())
			.collect::<Vec<_>>();
		if let Some(dlc) = packages.iter().find(|p| p.is_dlc()) {
			return Err(UninstallError::Forbidden(dlc.identifier.clone()))
		}

		/* Dependents go before their dependencies */
		let order = dependency_order(&packages).into_iter()
			.rev()
			.map(|i| packages[i].identifier.clone())
			.collect::<Vec<_>>();

		if !(self.confirm)(&Prompt::ContinueRemove { packages: order.clone() }) {
			return Err(UninstallError::Cancelled)
		}

		let mut registry = registry.clone();
		let mut txn = FileTransaction::new()?;
		let mut report = UninstallReport::default();
		let mut locked = Vec::<String>::new();

		/* Packages left registered because of locked files, along with everything they need */
		let mut kept = BTreeSet::<String>::new();

		let mut result = Ok(());
		for id in &order {
			let needed_by = registry.find_reverse_dependencies(&[id.identifier.clone()], installing).into_iter()
				.find(|d| kept.contains(d));
			if let Some(dependent) = needed_by {
				log::warn!("Keeping {}, {} is still installed and needs it", id, dependent);
				kept.insert(id.identifier.clone());
				continue;
			}

			match self.remove_package(&mut registry, &mut txn, &id.identifier) {
				Ok(removal) => {
					if removal.locked.is_empty() {
						report.removed.push(id.clone());
					} else {
						kept.insert(id.identifier.clone());
					}
					locked.extend(removal.locked);
					report.possible_leftover_dirs.extend(removal.leftovers);
				},
				Err(Cancelled) => {
					result = Err(UninstallError::Cancelled);
					break;
				},
			}
		}
		if result.is_ok() {
			result = GameInstance::write_registry(self.instance.data_dir(), &registry, false).map_err(UninstallError::from);
		}

		if let Err(e) = result {
			log::warn!("Uninstall failed, rolling back: {}", e);
			if let Err(rollback) = txn.rollback() {
				log::warn!("Rollback incomplete: {}", rollback);
			}
			return Err(e)
		}

		txn.commit();
		self.instance.replace_registry(registry);
		report.possible_leftover_dirs.sort();
		report.possible_leftover_dirs.dedup();

		log::info!("Removed {} packages", report.removed.len());
		if locked.is_empty() {
			Ok(report)
		} else {
			Err(UninstallError::PartialFailure { locked, report })
		}
	}

	/// Deletes the files of one installed package and prunes the directories left empty.
	///
	/// The package is deregistered unless some of its files couldn't be deleted, in which case it
	/// stays registered owning only those files.
	pub(super) fn remove_package(&self, registry: &mut FileOwnershipRegistry, txn: &mut FileTransaction, identifier: &str) -> Result<Removal, Cancelled> {
		let Some(installed) = registry.installed_package(identifier) else { return Ok(Removal::default()) };
		let files = installed.files().clone();
		log::info!("Removing {} with {} files", installed.identifier(), files.len());

		let mut removal = Removal::default();
		let mut deleted = Vec::<String>::new();
		for file in &files {
			if self.cancel.is_cancelled() {
				return Err(Cancelled)
			}

			match txn.delete_file(&self.instance.to_absolute(file)) {
				Ok(()) => deleted.push(file.clone()),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
					log::warn!("{} was already removed", file);
					deleted.push(file.clone());
				},
				Err(e) => {
					log::warn!("Failed to remove {}: {}", file, e);
					removal.locked.push(file.clone());
				},
			}
		}

		if removal.locked.is_empty() {
			registry.deregister_package(identifier);
		} else {
			registry.release_files(identifier, &deleted);
		}

		removal.leftovers = self.prune_directories(registry, txn, &files, &deleted);
		Ok(removal)
	}

	/// Removes the parent directories of `deleted` that hold nothing worth keeping, returning
	/// the directories kept only because of files no package owns.
	fn prune_directories(&self, registry: &FileOwnershipRegistry, txn: &mut FileTransaction, package_files: &BTreeSet<String>, deleted: &[String]) -> Vec<PathBuf> {
		let game_dir = self.instance.game_dir();

		let mut directories = BTreeSet::<PathBuf>::new();
		for file in deleted {
			let path = self.instance.to_absolute(file);
			let mut parent = path.parent();
			while let Some(dir) = parent {
				if dir == game_dir || !dir.starts_with(game_dir) { break; }
				directories.insert(dir.to_path_buf());
				parent = dir.parent();
			}
		}

		let mut directories = directories.into_iter().collect::<Vec<_>>();
		directories.sort_by(|a, b| b.components().count().cmp(&a.components().count()).then_with(|| a.cmp(b)));

		let mut leftovers = Vec::<PathBuf>::new();
		for dir in directories {
			if self.instance.is_reserved_directory(&dir) || !dir.is_dir() {
				continue;
			}

			let mut removable_files = Vec::<PathBuf>::new();
			let mut removable_dirs = Vec::<PathBuf>::new();
			let mut kept_owned = false;
			let mut kept_unowned = false;

			for entry in walkdir::WalkDir::new(&dir).min_depth(1).contents_first(true) {
				let entry = match entry {
					Ok(entry) => entry,
					Err(e) => {
						log::warn!("Failed to read {}: {}", dir.display(), e);
						kept_owned = true;
						break;
					},
				};
				let path = entry.into_path();
				let relative = pathdiff::diff_paths(&path, game_dir).map(normalize_path).unwrap_or_default();
				if registry.file_owner(&relative).is_some() {
					kept_owned = true;
				} else if path.is_dir() {
					removable_dirs.push(path);
				} else if !package_files.contains(&relative) && self.is_auto_removable(&path) {
					removable_files.push(path);
				} else {
					kept_unowned = true;
				}
			}

			if kept_owned {
				continue;
			}
			if kept_unowned {
				log::info!("{} holds files not owned by any package", dir.display());
				leftovers.push(dir);
				continue;
			}

			let pruned = removable_files.iter().try_for_each(|f| txn.delete_file(f))
				.and_then(|_| removable_dirs.iter().try_for_each(|d| txn.remove_dir(d)))
				.and_then(|_| txn.remove_dir(&dir));
			match pruned {
				Ok(()) => log::trace!("Removed directory {}", dir.display()),
				Err(e) => log::warn!("Failed to remove directory {}: {}", dir.display(), e),
			}
		}

		leftovers
	}

	/// Checks whether `path` is inside one of the instance's auto-removable folders.
	fn is_auto_removable(&self, path: &Path) -> bool {
		let Ok(relative) = path.strip_prefix(self.instance.game_dir()) else { return false };
		let names = self.instance.auto_removable_dirs();
		relative.parent()
			.map(|p| p.components().any(|c| names.iter().any(|n| n.eq_ignore_ascii_case(&c.as_os_str().to_string_lossy()))))
			.unwrap_or(false)
	}
}
