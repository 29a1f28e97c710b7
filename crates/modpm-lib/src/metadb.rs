//! # Package catalog
//!
//! The resolver and installer only ever read package metadata through [`PackageCatalog`].
//! Loading a catalog from its native format is left to the caller, [`MetaDB`] is a plain
//! in-memory implementation that can be filled from any source.

use serde::*;

pub mod package;
pub use package::Package;

pub mod iterator;

use package::*;
use iterator::*;

/// Read-only index of every known package version.
pub trait PackageCatalog {
	/// Every package version in the catalog.
	fn packages(&self) -> Box<dyn Iterator<Item = &Package> + '_>;

	/// Every known version of the identifier, virtual providers are not included.
	fn all_versions(&self, identifier: &str) -> Vec<&Package> {
		let mut versions = self.packages()
			.filter(|p| p.identifier.identifier == identifier)
			.collect::<Vec<_>>();
		versions.sort_by(|a, b| b.identifier.version.cmp(&a.identifier.version));
		versions
	}

	/// Every package version that is or provides `name`.
	fn providers(&self, name: &str) -> Vec<&Package> {
		self.packages().descriptor_matches(PackageDescriptor::any(name)).collect()
	}

	/// The latest package matching the `replaced_by` of the newest version of `identifier`.
	fn replacement(&self, identifier: &str) -> Option<&Package> {
		let latest = self.all_versions(identifier).into_iter().next()?;
		let descriptor = latest.replaced_by.as_ref()?;
		self.packages()
			.filter(|p| does_package_match_descriptor(&p.identifier, descriptor))
			.max_by(|a, b| a.identifier.version.cmp(&b.identifier.version))
	}
}

/// In-memory catalog.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MetaDB {
	packages: Vec<Package>,
}

impl MetaDB {
	pub fn new(packages: impl IntoIterator<Item = Package>) -> Self {
		let mut db = Self::default();
		for p in packages {
			db.add_package(p);
		}
		db
	}

	/// Adds a package, replacing any existing package with the same identifier and version.
	pub fn add_package(&mut self, package: Package) {
		if let Some(existing) = self.packages.iter_mut().find(|p| p.identifier == package.identifier) {
			log::trace!("Replacing catalog entry for {}", package.identifier);
			*existing = package;
		} else {
			self.packages.push(package);
		}
	}

	pub fn get_from_unique_id(&self, id: impl AsRef<PackageIdentifier>) -> Option<&Package> {
		let id = id.as_ref();
		self.packages.iter().find(|p| &p.identifier == id)
	}

	pub fn len(&self) -> usize {
		self.packages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.packages.is_empty()
	}
}

impl PackageCatalog for MetaDB {
	fn packages(&self) -> Box<dyn Iterator<Item = &Package> + '_> {
		Box::new(self.packages.iter())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn db() -> MetaDB {
		let mut old = Package::new("Old", "1.0");
		old.replaced_by = Some(PackageDescriptor::any("New"));
		let mut provider = Package::new("Provider", "1.0");
		provider.provides.insert("Old".to_string());
		MetaDB::new([
			old,
			Package::new("New", "1.0"),
			Package::new("New", "1.2"),
			provider,
		])
	}

	#[test] fn all_versions_is_newest_first() { assert_eq!(db().all_versions("New")[0].identifier.version, PackageVersion::new("1.2")) }
	#[test] fn all_versions_excludes_providers() { assert_eq!(db().all_versions("Old").len(), 1) }
	#[test] fn providers_includes_virtual() { assert_eq!(db().providers("Old").len(), 2) }
	#[test] fn replacement_is_latest_match() { assert_eq!(db().replacement("Old").map(|p| p.identifier.clone()), Some(PackageIdentifier::new("New", "1.2"))) }
	#[test] fn replacement_of_unreplaced_is_none() { assert!(db().replacement("New").is_none()) }
	#[test] fn adding_same_version_replaces() { let mut db = db(); db.add_package(Package::new("New", "1.2")); assert_eq!(db.len(), 4) }
}
