//! Used to track what packages are installed to a game directory and which files they own.
//!
//! Every path recorded for a package is relative to the game directory, uses `/` separators,
//! is physically present and has been installed by that package alone. No path is ever owned
//! by two packages.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::*;

use crate::metadb::PackageCatalog;
use crate::metadb::package::*;

/// A package as installed to a game instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledPackage {
	package: Package,
	files: BTreeSet<String>,
	auto_installed: bool,
	install_time: std::time::SystemTime,
}

impl InstalledPackage {
	pub fn package(&self) -> &Package {
		&self.package
	}

	pub fn identifier(&self) -> &PackageIdentifier {
		&self.package.identifier
	}

	pub fn files(&self) -> &BTreeSet<String> {
		&self.files
	}

	/// Only present to satisfy the dependency of another package.
	pub fn is_auto_installed(&self) -> bool {
		self.auto_installed
	}

	pub fn install_time(&self) -> std::time::SystemTime {
		self.install_time
	}
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("{path} is already owned by {owner}, can't be claimed by {claimant}")]
	FileOwned {
		path: String,
		owner: String,
		claimant: PackageIdentifier,
	},
	#[error("{0} is already installed")]
	AlreadyInstalled(PackageIdentifier),
	#[error("{0} is not a DLC")]
	NotDlc(PackageIdentifier),
}

/// The installed packages of one game instance and the file ownership map derived from them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileOwnershipRegistry {
	installed: BTreeMap<String, InstalledPackage>,
	/* Path to owning identifier */
	owners: HashMap<String, String>,
}

/// Converts a path relative to the game directory into the form stored by the registry.
pub fn normalize_path(path: impl AsRef<Path>) -> String {
	path.as_ref()
		.components()
		.filter_map(|c| match c {
			std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
			_ => None,
		})
		.collect::<Vec<_>>()
		.join("/")
}

impl FileOwnershipRegistry {
	pub fn installed_package(&self, identifier: &str) -> Option<&InstalledPackage> {
		self.installed.get(identifier)
	}

	pub fn installed_packages(&self) -> impl Iterator<Item = &InstalledPackage> {
		self.installed.values()
	}

	pub fn is_installed(&self, identifier: &str) -> bool {
		self.installed.contains_key(identifier)
	}

	pub fn installed_version(&self, identifier: &str) -> Option<&PackageVersion> {
		self.installed.get(identifier).map(|i| &i.package.identifier.version)
	}

	/// The identifier of the package owning `path`, if any.
	pub fn file_owner(&self, path: &str) -> Option<&str> {
		self.owners.get(path).map(|s| s.as_str())
	}

	/// Records a package and claims its files.
	///
	/// # Errors
	/// - [`RegistryError::AlreadyInstalled`] if another version of the identifier is registered.
	/// - [`RegistryError::FileOwned`] if any of the files already belong to another package.
	/// Nothing is recorded on error.
	pub fn register_package(&mut self, package: Package, files: impl IntoIterator<Item = String>, auto_installed: bool) -> Result<(), RegistryError> {
		let id = package.identifier.identifier.clone();
		if let Some(existing) = self.installed.get(&id) {
			return Err(RegistryError::AlreadyInstalled(existing.package.identifier.clone()))
		}

		let files = files.into_iter().collect::<BTreeSet<_>>();
		for f in &files {
			if let Some(owner) = self.owners.get(f) {
				return Err(RegistryError::FileOwned {
					path: f.clone(),
					owner: owner.clone(),
					claimant: package.identifier.clone(),
				})
			}
		}

		log::trace!("Registering {} with {} files", package.identifier, files.len());
		for f in &files {
			self.owners.insert(f.clone(), id.clone());
		}
		self.installed.insert(id, InstalledPackage {
			package,
			files,
			auto_installed,
			install_time: std::time::SystemTime::now(),
		});
		Ok(())
	}

	/// Removes a package and releases ownership of its files.
	pub fn deregister_package(&mut self, identifier: &str) -> Option<InstalledPackage> {
		let removed = self.installed.remove(identifier)?;
		log::trace!("Deregistering {}", removed.package.identifier);
		for f in &removed.files {
			self.owners.remove(f);
		}
		Some(removed)
	}

	/// Releases ownership of the given files while keeping the package registered.
	pub fn release_files<'a>(&mut self, identifier: &str, files: impl IntoIterator<Item = &'a String>) {
		if let Some(installed) = self.installed.get_mut(identifier) {
			for f in files {
				if installed.files.remove(f) {
					self.owners.remove(f);
				}
			}
		}
	}

	pub fn set_auto_installed(&mut self, identifier: &str, auto_installed: bool) {
		if let Some(installed) = self.installed.get_mut(identifier) {
			log::trace!("Setting auto installed of {} to {}", identifier, auto_installed);
			installed.auto_installed = auto_installed;
		}
	}

	/// Finds every installed package that would have unmet dependencies once `removing` is gone.
	///
	/// The result includes `removing` itself and is closed over transitive dependents.
	/// `installing` are treated as present so packages only depending on them are never cascaded.
	pub fn find_reverse_dependencies(&self, removing: &[String], installing: &[Package]) -> BTreeSet<String> {
		let mut to_remove = removing.iter()
			.filter(|r| self.installed.contains_key(*r))
			.cloned()
			.collect::<BTreeSet<_>>();
		let installing_ids = installing.iter().map(|p| p.identifier.identifier.as_str()).collect::<BTreeSet<_>>();
		let everything = self.installed.values().map(|i| &i.package).chain(installing.iter()).collect::<Vec<_>>();
		/* Dependencies that were already unmet aren't caused by this removal */
		let newly_unmet = |rel: &Relationship, remaining: &[&Package]| {
			!remaining.iter().any(|r| does_package_fulfill_relationship(r, rel)) &&
			everything.iter().any(|r| does_package_fulfill_relationship(r, rel))
		};

		loop {
			let remaining = self.installed.values()
				.filter(|i| !to_remove.contains(&i.package.identifier.identifier) && !installing_ids.contains(i.package.identifier.identifier.as_str()))
				.map(|i| &i.package)
				.chain(installing.iter())
				.collect::<Vec<_>>();

			let broken = remaining.iter()
				.filter(|p| self.installed.contains_key(&p.identifier.identifier) && !installing_ids.contains(p.identifier.identifier.as_str()))
				.filter(|p| p.depends.iter().any(|rel| newly_unmet(rel, &remaining)))
				.map(|p| p.identifier.identifier.clone())
				.collect::<Vec<_>>();

			if broken.is_empty() {
				return to_remove
			}
			to_remove.extend(broken);
		}
	}

	/// Finds auto-installed packages that nothing but other auto-installed packages would depend on once `removing` is gone.
	///
	/// Packages in `installing` count as explicitly installed dependents, whatever they depend on
	/// directly or through other installed packages is kept.
	pub fn find_removable_auto_installed(&self, removing: &BTreeSet<String>, installing: &[Package]) -> BTreeSet<String> {
		let required = self.required_by(installing, removing);
		let mut removable = BTreeSet::<String>::new();
		loop {
			let gone = removing.iter().chain(removable.iter()).cloned().collect::<Vec<_>>();
			let mut found = false;

			for candidate in self.installed.values().filter(|i| i.auto_installed) {
				let id = &candidate.package.identifier.identifier;
				if removing.contains(id) || removable.contains(id) || required.contains(id) { continue; }

				let mut with_candidate = gone.clone();
				with_candidate.push(id.clone());
				let dependents = self.find_reverse_dependencies(&with_candidate, installing);
				let all_auto = dependents.iter()
					.filter(|d| !gone.contains(d))
					.all(|d| self.installed.get(d).map(|i| i.auto_installed).unwrap_or(false));

				if all_auto {
					log::trace!("{} is no longer required", id);
					removable.insert(id.clone());
					found = true;
				}
			}

			if !found {
				return removable
			}
		}
	}

	/// Installed packages, outside of `removing`, that `installing` depend on directly or transitively.
	fn required_by(&self, installing: &[Package], removing: &BTreeSet<String>) -> BTreeSet<String> {
		let available = self.installed.values()
			.filter(|i| !removing.contains(&i.package.identifier.identifier))
			.map(|i| &i.package)
			.collect::<Vec<_>>();

		let mut required = BTreeSet::<String>::new();
		let mut pending = installing.iter().collect::<Vec<_>>();
		while let Some(package) = pending.pop() {
			for rel in &package.depends {
				if installing.iter().any(|p| does_package_fulfill_relationship(p, rel)) { continue; }
				for provider in available.iter().filter(|p| does_package_fulfill_relationship(p, rel)) {
					if required.insert(provider.identifier.identifier.clone()) {
						pending.push(*provider);
					}
				}
			}
		}
		required
	}

	/// Installed packages that have a replacement available in the catalog.
	pub fn find_replaceable<'c>(&self, catalog: &'c dyn PackageCatalog) -> Vec<(&PackageIdentifier, &'c Package)> {
		self.installed.values()
			.filter_map(|i| {
				let replacement = catalog.replacement(&i.package.identifier.identifier)?;
				Some((&i.package.identifier, replacement))
			})
			.collect()
	}

	/// Checks that no installed packages conflict and that every dependency is met.
	///
	/// Returns a description of every problem found.
	pub fn check_consistency(&self) -> Result<(), Vec<String>> {
		let packages = self.installed.values().map(|i| &i.package).collect::<Vec<_>>();
		let mut problems = Vec::<String>::new();

		for (i, lhs) in packages.iter().enumerate() {
			for rhs in &packages[i + 1..] {
				if Package::do_packages_conflict(lhs, rhs) {
					problems.push(format!("{} conflicts with {}", lhs.identifier, rhs.identifier));
				}
			}
			for rel in &lhs.depends {
				if !packages.iter().any(|p| does_package_fulfill_relationship(p, rel)) {
					problems.push(format!("{} depends on {} which is not installed", lhs.identifier, rel));
				}
			}
		}

		if problems.is_empty() { Ok(()) } else { Err(problems) }
	}
}
