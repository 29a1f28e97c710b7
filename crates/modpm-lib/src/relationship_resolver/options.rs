use crate::metadb::package::ReleaseStatus;

/// Switches controlling how far the resolver expands optional relationships and how strict it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipResolverOptions {
	/// Auto-select the default alternative of each `recommends` relationship.
	pub with_recommends: bool,
	/// Auto-select `suggests` of the requested packages.
	pub with_suggests: bool,
	/// Auto-select `suggests` of every package in the plan, not just the requested ones.
	pub with_all_suggests: bool,
	/// Report conflicting pairs in the plan instead of failing.
	///
	/// Only meant for queries such as "what would conflict with this", never for a real install.
	pub allow_inconsistencies: bool,
	/// Skip every optional relationship.
	pub conflicts_only: bool,
	/// Least stable release status a candidate may have.
	pub stability_tolerance: ReleaseStatus,
}

impl Default for RelationshipResolverOptions {
	fn default() -> Self {
		Self {
			with_recommends: true,
			with_suggests: false,
			with_all_suggests: false,
			allow_inconsistencies: false,
			conflicts_only: false,
			stability_tolerance: ReleaseStatus::Stable,
		}
	}
}

impl RelationshipResolverOptions {
	/// Only hard dependencies.
	pub fn depends_only() -> Self {
		Self {
			with_recommends: false,
			..Default::default()
		}
	}

	/// Options for finding every conflict a set of packages would cause.
	pub fn conflicts() -> Self {
		Self {
			with_recommends: false,
			allow_inconsistencies: true,
			conflicts_only: true,
			..Default::default()
		}
	}

	pub(super) fn expands_optional(&self) -> bool {
		!self.conflicts_only && (self.with_recommends || self.with_suggests || self.with_all_suggests)
	}
}
