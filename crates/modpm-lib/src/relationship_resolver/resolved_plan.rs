use std::collections::HashSet;

use crate::metadb::package::*;
use super::{ConflictPair, OptionalRelationship, SelectionReason};

/// A package accepted by the resolver.
#[derive(Debug, Clone)]
pub struct PlannedPackage {
	pub package: Package,
	pub reason: SelectionReason,
}

impl PlannedPackage {
	/// Only in the plan to satisfy another package's dependency.
	pub fn is_auto_installed(&self) -> bool {
		matches!(self.reason, SelectionReason::Depends(_))
	}
}

/// The result of a successful resolve.
///
/// Packages are in install order, every package comes after the packages satisfying its `depends`.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPlan {
	pub(super) packages: Vec<PlannedPackage>,
	pub(super) superseded: Vec<PackageIdentifier>,
	pub(super) optional: Vec<OptionalRelationship>,
	pub(super) conflicts: Vec<ConflictPair>,
}

impl ResolvedPlan {
	pub fn packages(&self) -> &[PlannedPackage] {
		&self.packages
	}

	pub fn identifiers(&self) -> Vec<&PackageIdentifier> {
		self.packages.iter().map(|p| &p.package.identifier).collect()
	}

	pub fn get(&self, identifier: &str) -> Option<&PlannedPackage> {
		self.packages.iter().find(|p| p.package.identifier.identifier == identifier)
	}

	pub fn is_empty(&self) -> bool {
		self.packages.is_empty()
	}

	/// Installed versions replaced by a newer version in this plan.
	pub fn superseded(&self) -> &[PackageIdentifier] {
		&self.superseded
	}

	/// Every optional relationship found, whether an alternative was auto-selected or not.
	pub fn optional(&self) -> &[OptionalRelationship] {
		&self.optional
	}

	/// Conflicting pairs, only ever non-empty when inconsistencies are allowed.
	pub fn conflicts(&self) -> &[ConflictPair] {
		&self.conflicts
	}

	pub fn is_consistent(&self) -> bool {
		self.conflicts.is_empty()
	}

	/// Sum of the installed size of every package.
	pub fn install_size(&self) -> u64 {
		self.packages.iter().map(|p| p.package.install_size).sum()
	}

	/// Checks that every package of the plan satisfying a `depends` of `package` is in `done`.
	///
	/// Dependencies satisfied only by packages outside the plan are already installed.
	pub fn ready_to_install(&self, package: &Package, done: &HashSet<String>) -> bool {
		package.depends.iter().all(|rel| {
			let mut providers = self.packages.iter()
				.filter(|p| p.package.identifier != package.identifier)
				.filter(|p| does_package_fulfill_relationship(&p.package, rel))
				.peekable();
			providers.peek().is_none() || providers.any(|p| done.contains(&p.package.identifier.identifier))
		})
	}
}
