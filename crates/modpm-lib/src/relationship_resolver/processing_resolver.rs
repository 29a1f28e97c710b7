//! The resolve process itself.

use std::collections::{BTreeMap, BTreeSet};

use super::*;
use crate::metadb::iterator::*;

pub enum ResolverStatus {
	/// The resolve has been succsessful, all packages are valid and compatible with each other.
	Complete(ResolvedPlan),
	/// The resolver was not able to determine which package to use when presented with a choice.
	/// Use [`RelationshipResolver::add_decision`] with one of [`DecisionInfo::options`] and resolve again.
	DecisionsRequired(DecisionInfo),
	/// A dependency can't be satisfied by any available package, or an installed package would be
	/// left with an unmet dependency once the plan is applied.
	Unsatisfied(UnsatisfiedInfo),
	/// Packages in the plan or installed conflict with each other.
	///
	/// Every conflicting pair is listed, not just the first found.
	Inconsistent(Vec<ConflictPair>),
}

impl ResolverStatus {
	pub fn into_result(self) -> Result<ResolvedPlan, ResolutionError> {
		match self {
			ResolverStatus::Complete(plan) => Ok(plan),
			ResolverStatus::DecisionsRequired(info) => Err(ResolutionError::TooManyProviders(info)),
			ResolverStatus::Unsatisfied(info) => Err(ResolutionError::DependencyNotSatisfied(info)),
			ResolverStatus::Inconsistent(pairs) => Err(ResolutionError::Inconsistent(pairs)),
		}
	}
}

/// Anything stopping the closure before a plan is produced.
enum Halt {
	Decision(DecisionInfo),
	Unsatisfied(UnsatisfiedInfo),
	Inconsistent(Vec<ConflictPair>),
}

#[derive(Debug, Clone)]
struct Selected {
	package: Package,
	reason: SelectionReason,
}

type Working = BTreeMap<String, Selected>;

/// Resolves a set of requested packages into a [`ResolvedPlan`].
///
/// # Process
/// The requested packages seed a working set which is expanded in rounds. Each round looks at the
/// packages added by the previous one, in identifier order, and checks their relationships against
/// the working set as it was when the round began plus the installed packages. An unmet `depends`
/// with a single candidate adds that candidate, no candidates fails the resolve and several
/// candidates requires the caller to pick one. Once a round adds nothing the installed packages are
/// checked to still have their dependencies met, everything is checked for conflicts and the plan
/// is put into install order.
pub struct RelationshipResolver<'a> {
	catalog: &'a dyn PackageCatalog,
	registry: &'a FileOwnershipRegistry,
	criteria: VersionCriteria,
	options: RelationshipResolverOptions,
	requested: Vec<Package>,
	excluded: BTreeSet<String>,
}

impl<'a> RelationshipResolver<'a> {
	pub(super) fn new(catalog: &'a dyn PackageCatalog, registry: &'a FileOwnershipRegistry, criteria: VersionCriteria, options: RelationshipResolverOptions, requested: Vec<Package>, excluded: BTreeSet<String>) -> Self {
		Self { catalog, registry, criteria, options, requested, excluded }
	}

	/// Adds a package chosen from [`DecisionInfo::options`] to the requested packages.
	pub fn add_decision(&mut self, package: Package) {
		log::trace!("Adding decision {}", package.identifier);
		self.requested.retain(|p| p.identifier.identifier != package.identifier.identifier);
		self.requested.push(package);
	}

	pub fn requested(&self) -> &[Package] {
		&self.requested
	}

	/// Run the resolver process until complete or stopped by a decision or failure.
	///
	/// Resolving is read-only and deterministic, the same inputs always produce the same plan.
	pub fn resolve(&self) -> ResolverStatus {
		match self.run() {
			Ok(plan) => {
				log::info!("Resolved {} packages", plan.packages.len());
				ResolverStatus::Complete(plan)
			},
			Err(Halt::Decision(info)) => {
				log::info!("Resolve requires a decision: {}", info);
				ResolverStatus::DecisionsRequired(info)
			},
			Err(Halt::Unsatisfied(info)) => {
				log::info!("Resolve failed: {}", info);
				ResolverStatus::Unsatisfied(info)
			},
			Err(Halt::Inconsistent(pairs)) => {
				log::info!("Resolve found {} conflicts", pairs.len());
				ResolverStatus::Inconsistent(pairs)
			},
		}
	}

	fn run(&self) -> Result<ResolvedPlan, Halt> {
		let mut working = Working::new();
		let mut superseded = Vec::<PackageIdentifier>::new();

		for package in &self.requested {
			let id = &package.identifier.identifier;
			if let Some(existing) = working.get(id) {
				if existing.package.identifier != package.identifier {
					return Err(Halt::Inconsistent(vec![ConflictPair::new(&existing.package, package)]))
				}
				continue;
			}

			match self.registry.installed_package(id) {
				Some(installed) if installed.identifier() == &package.identifier => {
					log::trace!("{} is already installed", package.identifier);
					continue;
				},
				Some(installed) => superseded.push(installed.identifier().clone()),
				None => {},
			}

			working.insert(id.clone(), Selected { package: package.clone(), reason: SelectionReason::Requested });
		}

		/* Installed packages still present once the plan is applied */
		let installed = self.registry.installed_packages()
			.map(|i| i.package())
			.filter(|p| !self.excluded.contains(&p.identifier.identifier))
			.filter(|p| !superseded.iter().any(|s| s.identifier == p.identifier.identifier))
			.collect::<Vec<_>>();

		let mut optional = Vec::<OptionalRelationship>::new();
		let mut frontier = working.keys().cloned().collect::<Vec<_>>();

		while !frontier.is_empty() {
			let additions = self.expand_round(&working, &installed, &frontier, &mut optional)?;
			frontier = additions.keys().cloned().collect();
			working.extend(additions);
		}

		check_installed_depends(&working, &installed)?;

		let conflicts = self.find_conflicts(&working, &installed);
		if !conflicts.is_empty() && !self.options.allow_inconsistencies {
			return Err(Halt::Inconsistent(conflicts))
		}

		let selected = working.into_values().collect::<Vec<_>>();
		let refs = selected.iter().map(|s| &s.package).collect::<Vec<_>>();
		let order = dependency_order(&refs);

		Ok(ResolvedPlan {
			packages: order.into_iter().map(|i| PlannedPackage {
				package: selected[i].package.clone(),
				reason: selected[i].reason.clone(),
			}).collect(),
			superseded,
			optional,
			conflicts,
		})
	}

	/// Expands the packages in `frontier` against the working set, returning the packages to add.
	fn expand_round(&self, working: &Working, installed: &[&Package], frontier: &[String], optional: &mut Vec<OptionalRelationship>) -> Result<Working, Halt> {
		let mut additions = Working::new();

		for id in frontier {
			let Some(selected) = working.get(id) else { continue };
			let package = &selected.package;

			for rel in &package.depends {
				if is_satisfied(rel, working, installed) { continue; }

				let candidates = self.candidates(rel, installed);
				let chosen = match candidates.as_slice() {
					[] => return Err(Halt::Unsatisfied(UnsatisfiedInfo {
						requester: package.identifier.clone(),
						relationship: rel.clone(),
					})),
					[only] => *only,
					_ => match self.parent_choice(selected, working, &candidates) {
						Some(choice) => choice,
						None => return Err(Halt::Decision(DecisionInfo {
							requester: package.identifier.clone(),
							relationship: rel.clone(),
							options: candidates.iter().map(|p| (*p).clone()).collect(),
						})),
					},
				};

				log::trace!("Selected {} for {} of {}", chosen.identifier, rel, package.identifier);
				add_selection(&mut additions, working, installed, chosen, SelectionReason::Depends(package.identifier.clone()))?;
			}

			if self.options.expands_optional() {
				self.expand_optional(selected, working, installed, &mut additions, optional);
			}
		}

		Ok(additions)
	}

	/// Auto-selects the default alternative of optional relationships where it is safe to do so.
	fn expand_optional(&self, selected: &Selected, working: &Working, installed: &[&Package], additions: &mut Working, optional: &mut Vec<OptionalRelationship>) {
		let package = &selected.package;
		let with_suggests = self.options.with_all_suggests || (self.options.with_suggests && selected.reason == SelectionReason::Requested);

		let recommends = package.recommends.iter()
			.filter(|_| self.options.with_recommends)
			.map(|r| (OptionalKind::Recommends, r));
		let suggests = package.suggests.iter()
			.filter(|_| with_suggests)
			.map(|r| (OptionalKind::Suggests, r));

		for (kind, rel) in recommends.chain(suggests) {
			let choices = self.candidates(rel, installed);

			let default = if is_satisfied(rel, working, installed) || additions.values().any(|s| does_package_fulfill_relationship(&s.package, rel)) {
				None
			} else {
				let first = rel.first();
				let preferred = choices.iter()
					.filter(|c| first.map(|d| does_package_provide_descriptor(c, d)).unwrap_or(false))
					.collect::<Vec<_>>();
				match preferred.as_slice() {
					[only] => Some(**only),
					_ => None,
				}
			};

			let selected_choice = default.filter(|choice| {
				let clashes = working.values().map(|s| &s.package)
					.chain(additions.values().map(|s| &s.package))
					.chain(installed.iter().copied())
					.any(|p| Package::do_packages_conflict(p, choice) || (p.identifier.identifier == choice.identifier.identifier && p.identifier != choice.identifier));
				if clashes {
					log::warn!("Not selecting {} for {}, it conflicts with the plan", choice.identifier, package.identifier);
				}
				!clashes
			});

			if let Some(choice) = selected_choice {
				let reason = match kind {
					OptionalKind::Recommends => SelectionReason::Recommended(package.identifier.clone()),
					OptionalKind::Suggests => SelectionReason::Suggested(package.identifier.clone()),
				};
				log::trace!("Selected {} as {}", choice.identifier, reason);
				additions.entry(choice.identifier.identifier.clone()).or_insert(Selected { package: choice.clone(), reason });
			}

			optional.push(OptionalRelationship {
				kind,
				requester: package.identifier.clone(),
				relationship: rel.clone(),
				choices: choices.iter().map(|c| c.identifier.clone()).collect(),
				selected: selected_choice.map(|c| c.identifier.clone()),
			});
		}
	}

	/// The latest available version of every package satisfying `rel`, ordered by identifier.
	fn candidates(&self, rel: &Relationship, installed: &[&Package]) -> Vec<&'a Package> {
		let mut found = BTreeMap::<String, &'a Package>::new();
		for descriptor in rel.as_vec() {
			let latest = self.available(descriptor);
			for (id, package) in latest {
				found.entry(id).or_insert(package);
			}
		}

		let mut checked = BTreeMap::<String, Option<bool>>::new();
		found.into_values()
			.filter(|p| self.might_be_installable(p, installed, &mut checked))
			.collect()
	}

	/// Latest versions of packages providing the descriptor usable with this game and stability tolerance.
	fn available(&self, descriptor: &PackageDescriptor) -> BTreeMap<String, &'a Package> {
		let catalog: &'a dyn PackageCatalog = self.catalog;
		catalog.providers(&descriptor.name).into_iter()
			.descriptor_matches(descriptor.clone())
			.game_version_matches(&self.criteria)
			.stability_matches(self.options.stability_tolerance)
			.filter(|p| !self.excluded.contains(&p.identifier.identifier))
			.latest_versions()
	}

	/// Quick check that every `depends` of the package has at least one possible provider.
	///
	/// Results are kept in `checked` so each package is looked at once. A package still being
	/// checked further up is `None` and assumed installable, which keeps cycles finite.
	fn might_be_installable(&self, package: &Package, installed: &[&Package], checked: &mut BTreeMap<String, Option<bool>>) -> bool {
		let key = package.identifier.to_string();
		match checked.get(&key) {
			Some(Some(result)) => return *result,
			Some(None) => return true,
			None => {},
		}
		checked.insert(key.clone(), None);

		let result = package.depends.iter().all(|rel| {
			installed.iter().any(|p| does_package_fulfill_relationship(p, rel)) ||
			rel.as_vec().into_iter().any(|descriptor| {
				self.available(descriptor).into_values().any(|p| self.might_be_installable(p, installed, checked))
			})
		});
		checked.insert(key, Some(result));
		result
	}

	/// When the package was pulled in by another whose own `depends` names exactly one candidate, that candidate.
	fn parent_choice(&self, selected: &Selected, working: &Working, candidates: &[&'a Package]) -> Option<&'a Package> {
		let parent = working.get(&selected.reason.parent()?.identifier)?;
		let named = candidates.iter()
			.filter(|c| parent.package.depends.iter().any(|rel| rel.as_vec().iter().any(|d| d.name == c.identifier.identifier)))
			.collect::<Vec<_>>();
		match named.as_slice() {
			[only] => Some(**only),
			_ => None,
		}
	}

	/// Every conflicting pair among the plan and the installed packages that stay.
	fn find_conflicts(&self, working: &Working, installed: &[&Package]) -> Vec<ConflictPair> {
		let everything = working.values().map(|s| &s.package).chain(installed.iter().copied()).collect::<Vec<_>>();
		let mut pairs = Vec::<ConflictPair>::new();

		for (i, lhs) in everything.iter().enumerate() {
			for rhs in &everything[i + 1..] {
				if Package::do_packages_conflict(lhs, rhs) {
					pairs.push(ConflictPair::new(lhs, rhs));
				}
			}
		}

		pairs
	}
}

/// Installed packages that stay must still have every `depends` met once the plan is applied.
fn check_installed_depends(working: &Working, installed: &[&Package]) -> Result<(), Halt> {
	for package in installed {
		if let Some(rel) = package.depends.iter().find(|rel| !is_satisfied(rel, working, installed)) {
			return Err(Halt::Unsatisfied(UnsatisfiedInfo {
				requester: package.identifier.clone(),
				relationship: rel.clone(),
			}))
		}
	}
	Ok(())
}

fn is_satisfied(rel: &Relationship, working: &Working, installed: &[&Package]) -> bool {
	working.values().any(|s| does_package_fulfill_relationship(&s.package, rel)) ||
	installed.iter().any(|p| does_package_fulfill_relationship(p, rel))
}

/// Adds `chosen` to the round's additions unless it, or another version of it, is already present.
fn add_selection(additions: &mut Working, working: &Working, installed: &[&Package], chosen: &Package, reason: SelectionReason) -> Result<(), Halt> {
	let id = &chosen.identifier.identifier;
	let existing = working.get(id).map(|s| &s.package)
		.or_else(|| additions.get(id).map(|s| &s.package))
		.or_else(|| installed.iter().copied().find(|p| &p.identifier.identifier == id));

	match existing {
		Some(existing) if existing.identifier != chosen.identifier => Err(Halt::Inconsistent(vec![ConflictPair::new(existing, chosen)])),
		Some(_) => Ok(()),
		None => {
			additions.insert(id.clone(), Selected { package: chosen.clone(), reason });
			Ok(())
		},
	}
}
