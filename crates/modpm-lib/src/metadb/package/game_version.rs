//! Game version numbers and the compatibility predicate built from them.
//!
//! Game versions follow `MAJOR.MINOR[.PATCH[.BUILD]]`. Breaking changes usually come with minor
//! version bumps so "generally compatible" means matching major and minor, see
//! [`GameVersion::is_compatible_with()`].

use serde::*;

/// A specific release of the game.
///
/// The `build` number is not considered in Eq and Ord, `1.12.3` and `1.12.3.3173` are the same
/// release as far as package compatibility is concerned.
///
/// Ord should not be used for compatibility checks, a package claiming `1.12` supports every
/// `1.12.x` patch yet `1.12.3 > 1.12`. Use [`GameVersionBounds::is_version_compatible()`].
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct GameVersion {
	major: u32,
	minor: u32,
	patch: Option<u32>,
	build: Option<u32>,
}

impl GameVersion {
	/// Create a new [`GameVersion`] from a version string.
	///
	/// # Errors
	/// Returns a [`Parse`](crate::Error::Parse) error when:
	/// - Input is an "any" string.
	/// - Input doesn't include a minor version or has more than four components.
	/// - A component can't be parsed as an integer.
	pub fn new(s: impl AsRef<str>) -> crate::Result<Self> {
		use crate::Error::Parse;
		let s = s.as_ref();
		if s.eq_ignore_ascii_case("any") { return Err(Parse("\"any\" is not a real version".into())) }
		let components = s.split('.').collect::<Vec<_>>();
		if components.len() < 2 || components.len() > 4 { return Err(Parse(format!("wrong number of version components in \"{s}\""))) }

		let parse = |c: &str, what: &str| c.parse::<u32>().map_err(|_| Parse(format!("{what} version of \"{s}\" can't be parsed")));

		let major = parse(components[0], "major")?;
		let minor = parse(components[1], "minor")?;
		let patch = components.get(2).map(|c| parse(c, "patch")).transpose()?;
		let build = components.get(3).map(|c| parse(c, "build")).transpose()?;

		Ok(GameVersion { major, minor, patch, build })
	}

	/// Checks general compatibility between two versions.
	///
	/// 1. `major` and `minor` must match.
	/// 1. If `patch` is present in both, `self <= other`.
	pub fn is_compatible_with(&self, other: &Self) -> bool {
		if self.major == other.major && self.minor == other.minor {
			match (self.patch, other.patch) {
				(Some(lhs), Some(rhs)) => lhs <= rhs,
				_ => true,
			}
		} else {
			false
		}
	}

	pub fn major(&self) -> u32 { self.major }
	pub fn minor(&self) -> u32 { self.minor }
	pub fn patch(&self) -> Option<u32> { self.patch }
	pub fn build(&self) -> Option<u32> { self.build }
}

impl TryFrom<&str> for GameVersion {
	type Error = crate::Error;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl PartialEq for GameVersion {
	fn eq(&self, other: &Self) -> bool {
		self.major == other.major &&
		self.minor == other.minor &&
		self.patch == other.patch
	}
}

impl Ord for GameVersion {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		(self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
	}
}

impl PartialOrd for GameVersion {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl std::fmt::Display for GameVersion {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}", self.major, self.minor)?;
		if let Some(patch) = self.patch { write!(f, ".{patch}")?; }
		if let Some(build) = self.build { write!(f, ".{build}")?; }
		Ok(())
	}
}

pub type GameVersionBounds = super::VersionBounds<GameVersion>;

impl GameVersionBounds {
	/// Checks if `other` is a version compatible with this version bound.
	///
	/// # Parameters
	/// - `strict` - Should this check require the version to be exactly equal or just compatible.
	pub fn is_version_compatible(&self, other: &GameVersion, strict: bool) -> bool {
		match self {
			Self::Any => true,
			Self::Explicit(v) => {
				if strict {
					other == v
				} else {
					v.is_compatible_with(other)
				}
			},
			Self::MinOnly(min) => other >= min || other.is_compatible_with(min),
			Self::MaxOnly(max) => other <= max || other.is_compatible_with(max),
			Self::MinMax(min, max) => (min <= other || other.is_compatible_with(min)) && (other <= max || other.is_compatible_with(max)),
		}
	}
}

/// The set of game versions a game instance accepts packages for.
///
/// An empty criteria accepts every package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCriteria {
	versions: Vec<GameVersion>,
}

impl VersionCriteria {
	pub fn new(versions: impl IntoIterator<Item = GameVersion>) -> Self {
		Self { versions: versions.into_iter().collect() }
	}

	pub fn versions(&self) -> &[GameVersion] {
		&self.versions
	}

	/// Whether the package declares support for any of the versions.
	pub fn is_package_compatible(&self, package: &super::Package) -> bool {
		self.versions.is_empty() || self.versions.iter().any(|v| package.game_version.is_version_compatible(v, package.game_version_strict))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test] fn game_version_compares_as_ints() { assert!(GameVersion::new("1.9").unwrap() < GameVersion::new("1.10").unwrap()) }
	#[test] fn game_version_short_version_is_lt() { assert!(GameVersion::new("1.12").unwrap() < GameVersion::new("1.12.1").unwrap()) }
	#[test] fn game_version_identical_are_eq() { assert!(GameVersion::new("1.12.1").unwrap() == GameVersion::new("1.12.1").unwrap()) }
	#[test] fn game_version_build_has_no_effect() { assert!(GameVersion::new("1.12.1").unwrap() == GameVersion::new("1.12.1.1234").unwrap()) }
	#[test] fn game_version_any_is_not_real() { assert!(GameVersion::new("any").is_err()) }
	#[test] fn game_version_needs_minor() { assert!(GameVersion::new("1").is_err()) }
	#[test] fn game_version_display() { assert_eq!(GameVersion::new("1.12.3").unwrap().to_string(), "1.12.3") }

	#[test]
	fn bounds_minor_release_covers_patches() {
		let bounds = GameVersionBounds::Explicit(GameVersion::new("1.12").unwrap());
		assert!(bounds.is_version_compatible(&GameVersion::new("1.12.5").unwrap(), false));
		assert!(!bounds.is_version_compatible(&GameVersion::new("1.12.5").unwrap(), true));
	}

	#[test]
	fn bounds_max_accepts_patches_of_max() {
		let bounds = GameVersionBounds::MaxOnly(GameVersion::new("1.10").unwrap());
		assert!(bounds.is_version_compatible(&GameVersion::new("1.10.1").unwrap(), false));
		assert!(!bounds.is_version_compatible(&GameVersion::new("1.11").unwrap(), false));
	}
}
