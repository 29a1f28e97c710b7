use serde::*;
use super::*;

/// A unique identifier for packages.
///
/// Mainly used as an index into a [`PackageCatalog`](crate::metadb::PackageCatalog).
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PackageIdentifier {
	pub identifier: String,
	pub version: PackageVersion,
}

impl PackageIdentifier {
	pub fn new(identifier: impl Into<String>, version: impl Into<PackageVersion>) -> Self {
		Self { identifier: identifier.into(), version: version.into() }
	}
}

impl std::cmp::Ord for PackageIdentifier {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		match self.identifier.cmp(&other.identifier) {
			core::cmp::Ordering::Equal => {}
			ord => return ord,
		}
		self.version.cmp(&other.version)
	}
}

impl std::cmp::PartialOrd for PackageIdentifier {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl std::fmt::Display for PackageIdentifier {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} {}", self.identifier, self.version)
	}
}

impl AsRef<PackageIdentifier> for PackageIdentifier {
	fn as_ref(&self) -> &PackageIdentifier {
		self
	}
}

/// Describes a package using an identifier and version requirement.
///
/// Differs from [`PackageIdentifier`] in that it represents a range of packages.
/// `name` may also be a virtual identifier that packages declare in their `provides`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageDescriptor {
	pub name: String,
	pub version: PackageVersionBounds,
}

impl PackageDescriptor {
	pub fn new(name: impl Into<String>, version: PackageVersionBounds) -> Self {
		Self {
			name: name.into(),
			version,
		}
	}

	/// Descriptor for any version of `name`.
	pub fn any(name: impl Into<String>) -> Self {
		Self::new(name, VersionBounds::Any)
	}
}

impl std::fmt::Display for PackageDescriptor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.version {
			VersionBounds::Any => write!(f, "{}", self.name),
			bounds => write!(f, "{} {}", self.name, bounds),
		}
	}
}

/// A requirement of a package that must be met for the package to be installed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relationship {
	/// At least one of the descriptors must match to fulfill the relationship.
	AnyOf(Vec<PackageDescriptor>),
	/// This single descriptor requirement must be met.
	One(PackageDescriptor),
}

impl Relationship {
	/// Convienience function to collapse this relationship into a vector
	pub fn as_vec(&self) -> Vec<&PackageDescriptor> {
		match self {
			Relationship::AnyOf(v) => v.iter().collect::<Vec<_>>(),
			Relationship::One(r) => vec![r],
		}
	}

	/// The alternative selected by default when the relationship is optional.
	pub fn first(&self) -> Option<&PackageDescriptor> {
		match self {
			Relationship::AnyOf(v) => v.first(),
			Relationship::One(r) => Some(r),
		}
	}
}

impl From<PackageDescriptor> for Relationship {
	fn from(value: PackageDescriptor) -> Self {
		Relationship::One(value)
	}
}

impl std::fmt::Display for Relationship {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let descriptors = self.as_vec().iter().map(|d| d.to_string()).collect::<Vec<_>>();
		write!(f, "{}", descriptors.join(" | "))
	}
}

pub fn does_package_fulfill_relationship(package: &Package, relationship: &Relationship) -> bool {
	relationship.as_vec().into_iter().any(|desc| does_package_provide_descriptor(package, desc))
}

pub fn does_package_match_descriptor(identifier: &PackageIdentifier, descriptor: &PackageDescriptor) -> bool {
	if identifier.identifier != descriptor.name {
		return false
	}
	descriptor.version.is_version_within(&identifier.version)
}

/// Checks the identifier and the virtual `provides` of the package against the descriptor.
///
/// A provided name has no version of its own so the bounds are checked against the providing package's version.
pub fn does_package_provide_descriptor(package: &Package, descriptor: &PackageDescriptor) -> bool {
	if package.identifier.identifier != descriptor.name && !package.provides.iter().any(|m| m == &descriptor.name) {
		return false
	}
	descriptor.version.is_version_within(&package.identifier.version)
}
