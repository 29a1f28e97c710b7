use serde::*;

/// Version of a package, an optional integer epoch followed by a free-form version string.
///
/// Ordering compares the epoch first then walks the version string alternating between
/// non-numeric chunks, compared lexically, and numeric chunks, compared as integers.
#[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
	epoch: u32,
	version: String,
}

impl PackageVersion {
	/// Parses `"[epoch:]version"`. A prefix before `:` that isn't a number is kept as part of the version.
	pub fn new(version: &str) -> Self {
		match version.split_once(':') {
			Some((epoch, rest)) => match epoch.parse::<u32>() {
				Ok(epoch) => PackageVersion { epoch, version: rest.to_string() },
				Err(_) => PackageVersion { epoch: 0, version: version.to_string() },
			},
			None => PackageVersion { epoch: 0, version: version.to_string() },
		}
	}

	pub fn epoch(&self) -> u32 {
		self.epoch
	}

	pub fn version(&self) -> &str {
		&self.version
	}
}

impl From<&str> for PackageVersion {
	fn from(value: &str) -> Self { Self::new(value) }
}

impl From<String> for PackageVersion {
	fn from(value: String) -> Self { Self::new(&value) }
}

impl PartialEq for PackageVersion {
	fn eq(&self, other: &Self) -> bool {
		self.epoch == other.epoch &&
		self.version == other.version
	}
}

/// Splits off the leading run of characters where `numeric` matches `char::is_ascii_digit`.
fn split_run(s: &str, numeric: bool) -> (&str, &str) {
	let end = s.find(|c: char| c.is_ascii_digit() != numeric).unwrap_or(s.len());
	s.split_at(end)
}

/// Compares two runs of digits without parsing, so arbitrarily long numbers can't overflow.
fn cmp_numeric(lhs: &str, rhs: &str) -> std::cmp::Ordering {
	let lhs = lhs.trim_start_matches('0');
	let rhs = rhs.trim_start_matches('0');
	lhs.len().cmp(&rhs.len()).then_with(|| lhs.cmp(rhs))
}

impl Ord for PackageVersion {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		match self.epoch.cmp(&other.epoch) {
			std::cmp::Ordering::Equal => {},
			ord => return ord,
		}

		let mut lhs = self.version.as_str();
		let mut rhs = other.version.as_str();

		while !lhs.is_empty() && !rhs.is_empty() {
			let (l, lrest) = split_run(lhs, false);
			let (r, rrest) = split_run(rhs, false);
			match l.cmp(r) {
				std::cmp::Ordering::Equal => {},
				ord => return ord,
			}

			let (l, lrest) = split_run(lrest, true);
			let (r, rrest) = split_run(rrest, true);
			match cmp_numeric(l, r) {
				std::cmp::Ordering::Equal => {},
				ord => return ord,
			}

			lhs = lrest;
			rhs = rrest;
		}

		/* Falling back to the raw string keeps `Ord` agreeing with `Eq` for versions like "1.01" and "1.1" */
		lhs.len().cmp(&rhs.len()).then_with(|| self.version.cmp(&other.version))
	}
}

impl PartialOrd for PackageVersion {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl std::hash::Hash for PackageVersion {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.epoch.hash(state);
		self.version.hash(state);
	}
}

impl std::fmt::Display for PackageVersion {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.epoch == 0 {
			write!(f, "{}", self.version)
		} else {
			write!(f, "{}:{}", self.epoch, self.version)
		}
	}
}

pub type PackageVersionBounds = super::VersionBounds<PackageVersion>;
