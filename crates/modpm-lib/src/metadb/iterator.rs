//! Iterator adaptors for filtering packages.

use std::collections::BTreeMap;

use super::package::*;

pub struct GameVersionMatches<'a, 'c, I>
where
	I: Iterator<Item = &'a Package>,
{
	criteria: &'c VersionCriteria,
	underlying: I,
}

impl<'a, 'c, I> Iterator for GameVersionMatches<'a, 'c, I>
where
	I: Iterator<Item = &'a Package>,
{
	type Item = I::Item;

	fn next(&mut self) -> Option<Self::Item> {
		self.underlying.by_ref().find(|package| self.criteria.is_package_compatible(package))
	}
}

pub trait GameVersionMatchesExt<'a>: Iterator<Item = &'a Package>
{
	/// Filters the iterator to packages compatible with `criteria`
	fn game_version_matches(self, criteria: &VersionCriteria) -> GameVersionMatches<'a, '_, Self>
	where
		Self: Sized,
	{
		GameVersionMatches { underlying: self, criteria }
	}
}

impl<'a, I: Iterator<Item = &'a Package>> GameVersionMatchesExt<'a> for I {}


pub struct StabilityMatches<'a, I>
where
	I: Iterator<Item = &'a Package>,
{
	tolerance: ReleaseStatus,
	underlying: I,
}

impl<'a, I> Iterator for StabilityMatches<'a, I>
where
	I: Iterator<Item = &'a Package>,
{
	type Item = I::Item;

	fn next(&mut self) -> Option<Self::Item> {
		let tolerance = self.tolerance;
		self.underlying.by_ref().find(|package| package.release_status <= tolerance)
	}
}

pub trait StabilityMatchesExt<'a>: Iterator<Item = &'a Package>
{
	/// Filters the iterator to packages at least as stable as `tolerance`
	fn stability_matches(self, tolerance: ReleaseStatus) -> StabilityMatches<'a, Self>
	where
		Self: Sized,
	{
		StabilityMatches { underlying: self, tolerance }
	}
}

impl<'a, I: Iterator<Item = &'a Package>> StabilityMatchesExt<'a> for I {}


pub struct DescriptorMatches<'a, I>
where
	I: Iterator<Item = &'a Package>,
{
	descriptor: PackageDescriptor,
	underlying: I,
}

impl<'a, I> Iterator for DescriptorMatches<'a, I>
where
	I: Iterator<Item = &'a Package>,
{
	type Item = I::Item;

	fn next(&mut self) -> Option<Self::Item> {
		for package in self.underlying.by_ref() {
			if does_package_provide_descriptor(package, &self.descriptor) {
				return Some(package)
			}
		}
		None
	}
}

pub trait DescriptorMatchesExt<'a>: Iterator<Item = &'a Package>
{
	/// Filters the iterator to only packages matching the descriptor including `provides` relationships.
	/// This means the output may not be all the same identifier.
	fn descriptor_matches(self, descriptor: PackageDescriptor) -> DescriptorMatches<'a, Self>
	where
		Self: Sized,
	{
		DescriptorMatches { underlying: self, descriptor }
	}
}

impl<'a, I: Iterator<Item = &'a Package>> DescriptorMatchesExt<'a> for I {}

pub trait LatestVersionsExt<'a>: Iterator<Item = &'a Package>
{
	/// Collapses the iterator to the highest version of each identifier, keyed by identifier.
	fn latest_versions(self) -> BTreeMap<String, &'a Package>
	where
		Self: Sized,
	{
		let mut map = BTreeMap::<String, &'a Package>::new();
		for package in self {
			match map.get(&package.identifier.identifier) {
				Some(existing) if existing.identifier.version >= package.identifier.version => {},
				_ => { map.insert(package.identifier.identifier.clone(), package); },
			}
		}
		map
	}
}

impl<'a, I: Iterator<Item = &'a Package>> LatestVersionsExt<'a> for I {}
