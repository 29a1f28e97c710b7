use std::collections::BTreeSet;

use super::RelationshipResolver;
use super::RelationshipResolverOptions;
use crate::game_instance::FileOwnershipRegistry;
use crate::metadb::PackageCatalog;
use crate::metadb::package::*;

pub struct ResolverBuilder<'a> {
	catalog: &'a dyn PackageCatalog,
	registry: &'a FileOwnershipRegistry,
	criteria: VersionCriteria,
	options: RelationshipResolverOptions,
	requested: Vec<Package>,
	excluded: BTreeSet<String>,
}

impl<'a> ResolverBuilder<'a> {
	/// # Arguments
	/// - `catalog` - Packages available for installation.
	/// - `registry` - Packages already installed, they satisfy relationships without being reinstalled.
	pub fn new(catalog: &'a dyn PackageCatalog, registry: &'a FileOwnershipRegistry) -> Self {
		Self {
			catalog,
			registry,
			criteria: Default::default(),
			options: Default::default(),
			requested: Default::default(),
			excluded: Default::default(),
		}
	}

	pub fn requested(mut self, packages: impl IntoIterator<Item = Package>) -> Self {
		self.requested.extend(packages);
		self
	}

	pub fn version_criteria(mut self, criteria: VersionCriteria) -> Self {
		self.criteria = criteria;
		self
	}

	pub fn options(mut self, options: RelationshipResolverOptions) -> Self {
		self.options = options;
		self
	}

	/// Identifiers that must not be part of the plan, installed packages with these identifiers are treated as removed.
	pub fn exclude(mut self, identifiers: impl IntoIterator<Item = String>) -> Self {
		self.excluded.extend(identifiers);
		self
	}

	pub fn build(self) -> RelationshipResolver<'a> {
		RelationshipResolver::new(self.catalog, self.registry, self.criteria, self.options, self.requested, self.excluded)
	}
}
