//! Various types associated with packages.

use std::collections::BTreeSet;
use serde::*;

/// Metadata for a single version of a mod.
///
/// We use the term "Package" instead of "Module" due to the overlap with rust's keywords.
/// Packages are only ever built by catalog loading and are treated as immutable afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Package {
	pub identifier: PackageIdentifier,
	pub name: String,
	/// Rust friendly alias for `abstract`.
	pub blurb: String,
	/// Download locators, tried in order.
	pub download: Vec<String>,
	pub download_size: u64,
	pub install_size: u64,
	pub install: Vec<install::InstallDirective>,
	pub release_status: ReleaseStatus,
	pub game_version: GameVersionBounds,
	pub game_version_strict: bool,
	pub depends: Vec<Relationship>,
	pub recommends: Vec<Relationship>,
	pub suggests: Vec<Relationship>,
	pub conflicts: Vec<Relationship>,
	pub replaced_by: Option<PackageDescriptor>,
	pub kind: Kind,
	/// Virtual identifiers this package can stand in for.
	pub provides: BTreeSet<String>,
}

impl std::hash::Hash for Package {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.identifier.hash(state);
	}
}

impl std::cmp::Ord for Package {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.identifier.cmp(&other.identifier)
	}
}

impl std::cmp::PartialOrd for Package {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl std::cmp::PartialEq for Package {
	fn eq(&self, other: &Self) -> bool {
		self.identifier == other.identifier
	}
}

impl std::cmp::Eq for Package {}

impl AsRef<PackageIdentifier> for Package {
	fn as_ref(&self) -> &PackageIdentifier {
		&self.identifier
	}
}

impl Package {
	pub fn new(identifier: impl Into<String>, version: impl Into<PackageVersion>) -> Self {
		let identifier = PackageIdentifier::new(identifier, version);
		Self {
			name: identifier.identifier.clone(),
			identifier,
			..Default::default()
		}
	}

	/// Checks if the given packages conflict with each other.
	///
	/// Two versions of the same identifier never conflict, one replaces the other.
	pub fn do_packages_conflict(lhs: &Self, rhs: &Self) -> bool {
		if lhs.identifier.identifier == rhs.identifier.identifier {
			return false
		}
		lhs.conflicts.iter().any(|con| relationship::does_package_fulfill_relationship(rhs, con)) ||
		rhs.conflicts.iter().any(|con| relationship::does_package_fulfill_relationship(lhs, con))
	}

	pub fn is_metapackage(&self) -> bool {
		self.kind == Kind::MetaPackage
	}

	pub fn is_dlc(&self) -> bool {
		self.kind == Kind::DLC
	}

	/// Install stanzas, falling back to [`InstallDirective::default_for`] when none are declared.
	pub fn install_directives(&self) -> std::borrow::Cow<'_, [InstallDirective]> {
		if self.install.is_empty() {
			std::borrow::Cow::Owned(vec![InstallDirective::default_for(&self.identifier.identifier)])
		} else {
			std::borrow::Cow::Borrowed(&self.install)
		}
	}
}

mod version_bounds;
pub use version_bounds::VersionBounds;

mod game_version;
pub use game_version::GameVersion;
pub use game_version::GameVersionBounds;
pub use game_version::VersionCriteria;

mod package_version;
pub use package_version::PackageVersion;
pub use package_version::PackageVersionBounds;

pub mod install;
pub use install::InstallDirective;
pub use install::SourceDirective;
pub use install::OptionalDirective;

mod relationship;
pub use relationship::PackageIdentifier;
pub use relationship::PackageDescriptor;
pub use relationship::Relationship;
pub use relationship::does_package_fulfill_relationship;
pub use relationship::does_package_provide_descriptor;
pub use relationship::does_package_match_descriptor;

/// The stability of a package, ordered from most to least stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReleaseStatus {
	#[default] Stable,
	Testing,
	Development,
}

/// The type of a package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
	/// A normal installable module.
	#[default] Package,
	/// Has relationships to other packages while having no download of its own.
	MetaPackage,
	/// A paid expansion which can be detected but never installed or removed.
	DLC,
}

#[cfg(test)]
mod test {
	use super::*;

	fn conflicting(identifier: &str, conflicts: &str) -> Package {
		let mut p = Package::new(identifier, "1.0");
		p.conflicts.push(PackageDescriptor::any(conflicts).into());
		p
	}

	#[test] fn conflicts_are_symmetric() { assert!(Package::do_packages_conflict(&Package::new("B", "1.0"), &conflicting("A", "B"))) }
	#[test] fn unrelated_packages_dont_conflict() { assert!(!Package::do_packages_conflict(&Package::new("B", "1.0"), &Package::new("C", "1.0"))) }
	#[test] fn versions_of_the_same_package_dont_conflict() { assert!(!Package::do_packages_conflict(&conflicting("A", "A"), &Package::new("A", "2.0"))) }
	#[test] fn default_stanza_finds_identifier() { assert_eq!(Package::new("A", "1.0").install_directives()[0], InstallDirective::default_for("A")) }
	#[test] fn release_status_is_ordered_by_stability() { assert!(ReleaseStatus::Stable < ReleaseStatus::Testing && ReleaseStatus::Testing < ReleaseStatus::Development) }
}
