//! Utilities for getting a valid set of compatible packages to be installed from a list of desired packages.
//!
//! # Usage
//! 1. Create a [`ResolverBuilder`] with the catalog and the registry of the game instance.
//! 1. Use the builder to add requested packages, options and game versions.
//! 1. [`ResolverBuilder::build()`] to get a [`RelationshipResolver`]
//! 1. [`RelationshipResolver::resolve()`] until complete while answering any decisions presented
//! by [`ResolverStatus::DecisionsRequired`] by calling [`RelationshipResolver::add_decision()`] with a choice from the options.
//! 1. The [`ResolvedPlan`] of [`ResolverStatus::Complete`] lists every package to install, in install order.

use crate::metadb::PackageCatalog;
use crate::metadb::package::*;
use crate::game_instance::FileOwnershipRegistry;

mod dependency_graph;
pub use dependency_graph::dependency_order;

mod options;
pub use options::RelationshipResolverOptions;

mod resolver_builder;
pub use resolver_builder::ResolverBuilder;

mod processing_resolver;
pub use processing_resolver::RelationshipResolver;
pub use processing_resolver::ResolverStatus;

mod resolved_plan;
pub use resolved_plan::ResolvedPlan;
pub use resolved_plan::PlannedPackage;

/// Why a package is part of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionReason {
	/// Asked for directly by the user.
	Requested,
	/// Required by a `depends` of the package.
	Depends(PackageIdentifier),
	/// Default choice of a `recommends` of the package.
	Recommended(PackageIdentifier),
	/// Default choice of a `suggests` of the package.
	Suggested(PackageIdentifier),
}

impl SelectionReason {
	pub fn parent(&self) -> Option<&PackageIdentifier> {
		match self {
			SelectionReason::Requested => None,
			SelectionReason::Depends(p) | SelectionReason::Recommended(p) | SelectionReason::Suggested(p) => Some(p),
		}
	}
}

impl std::fmt::Display for SelectionReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SelectionReason::Requested => write!(f, "requested by user"),
			SelectionReason::Depends(p) => write!(f, "dependency of {p}"),
			SelectionReason::Recommended(p) => write!(f, "recommended by {p}"),
			SelectionReason::Suggested(p) => write!(f, "suggested by {p}"),
		}
	}
}

/// A virtual relationship with more than one provider, the user has to pick one.
#[derive(Debug, Clone)]
pub struct DecisionInfo {
	/// Which package requires this decision.
	pub requester: PackageIdentifier,
	pub relationship: Relationship,
	/// Available choices for the decision, ordered by identifier.
	pub options: Vec<Package>,
}

impl std::fmt::Display for DecisionInfo {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let options = self.options.iter().map(|p| p.identifier.identifier.as_str()).collect::<Vec<_>>();
		write!(f, "{} requires {} which is provided by [{}]", self.requester, self.relationship, options.join(", "))
	}
}

/// A dependency no available package can satisfy.
#[derive(Debug, Clone)]
pub struct UnsatisfiedInfo {
	pub requester: PackageIdentifier,
	pub relationship: Relationship,
}

impl std::fmt::Display for UnsatisfiedInfo {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} depends on {} which cannot be satisfied", self.requester, self.relationship)
	}
}

/// Two packages that can't be installed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPair {
	pub first: PackageIdentifier,
	pub second: PackageIdentifier,
	pub description: String,
}

impl ConflictPair {
	pub(crate) fn new(first: &Package, second: &Package) -> Self {
		let description = if first.identifier.identifier == second.identifier.identifier {
			format!("{} and {} are different versions of the same package", first.identifier, second.identifier)
		} else {
			format!("{} conflicts with {}", first.identifier, second.identifier)
		};
		Self {
			first: first.identifier.clone(),
			second: second.identifier.clone(),
			description,
		}
	}
}

impl std::fmt::Display for ConflictPair {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.description)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalKind {
	Recommends,
	Suggests,
}

/// An optional relationship found while resolving, exposed so the caller can offer the alternatives.
#[derive(Debug, Clone)]
pub struct OptionalRelationship {
	pub kind: OptionalKind,
	pub requester: PackageIdentifier,
	pub relationship: Relationship,
	/// Every available package satisfying the relationship.
	pub choices: Vec<PackageIdentifier>,
	/// The choice added to the plan, if any.
	pub selected: Option<PackageIdentifier>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
	#[error("{0}")]
	DependencyNotSatisfied(UnsatisfiedInfo),
	#[error("too many providers: {0}")]
	TooManyProviders(DecisionInfo),
	#[error("inconsistent package set: {}", .0.iter().map(|c| c.description.as_str()).collect::<Vec<_>>().join("; "))]
	Inconsistent(Vec<ConflictPair>),
}

/// Checks whether the packages could be installed together, trying every alternative of any virtual relationship.
///
/// Never fails, ambiguity is explored instead of reported. The search depth is bounded by the size of the catalog.
pub fn can_install(catalog: &dyn PackageCatalog, registry: &FileOwnershipRegistry, criteria: &VersionCriteria, options: &RelationshipResolverOptions, packages: Vec<Package>) -> bool {
	fn attempt(catalog: &dyn PackageCatalog, registry: &FileOwnershipRegistry, criteria: &VersionCriteria, options: &RelationshipResolverOptions, packages: Vec<Package>, depth: usize, limit: usize) -> bool {
		let resolver = ResolverBuilder::new(catalog, registry)
			.requested(packages.clone())
			.version_criteria(criteria.clone())
			.options(options.clone())
			.build();

		match resolver.resolve() {
			ResolverStatus::Complete(_) => true,
			ResolverStatus::DecisionsRequired(info) => {
				depth < limit && info.options.into_iter().any(|choice| {
					let mut next = packages.clone();
					next.push(choice);
					attempt(catalog, registry, criteria, options, next, depth + 1, limit)
				})
			},
			ResolverStatus::Unsatisfied(_) | ResolverStatus::Inconsistent(_) => false,
		}
	}

	let options = RelationshipResolverOptions { allow_inconsistencies: false, ..options.clone() };
	let limit = catalog.packages().count();
	attempt(catalog, registry, criteria, &options, packages, 0, limit)
}
