//! Values handed to the caller's callbacks while an operation runs.

use std::time::{Duration, Instant};

use crate::metadb::package::PackageIdentifier;

/// Progress of a byte counted operation such as downloading or copying files.
#[derive(Debug, Clone)]
pub struct ByteRateProgress {
	pub size: u64,
	pub bytes_left: u64,
	pub started: Instant,
	/// The package currently being worked on.
	pub current: Option<PackageIdentifier>,
}

impl ByteRateProgress {
	pub fn new(size: u64) -> Self {
		Self {
			size,
			bytes_left: size,
			started: Instant::now(),
			current: None,
		}
	}

	pub fn bytes_done(&self) -> u64 {
		self.size.saturating_sub(self.bytes_left)
	}

	pub fn elapsed(&self) -> Duration {
		self.started.elapsed()
	}

	pub fn bytes_per_second(&self) -> f64 {
		let secs = self.elapsed().as_secs_f64();
		if secs > 0.0 { self.bytes_done() as f64 / secs } else { 0.0 }
	}

	/// `None` until any progress has been made.
	pub fn time_left(&self) -> Option<Duration> {
		let rate = self.bytes_per_second();
		(rate > 0.0).then(|| Duration::from_secs_f64(self.bytes_left as f64 / rate))
	}

	pub(crate) fn advance(&mut self, bytes: u64) {
		self.bytes_left = self.bytes_left.saturating_sub(bytes);
	}
}

/// Questions the installer asks through the confirm callback.
#[derive(Debug, Clone)]
pub enum Prompt {
	/// About to install `install`, of which `download` must be fetched first.
	ContinueInstall {
		install: Vec<PackageIdentifier>,
		download: Vec<PackageIdentifier>,
	},
	/// About to remove these packages, including dependents and orphans.
	ContinueRemove {
		packages: Vec<PackageIdentifier>,
	},
	/// Files not owned by any package are in the way of `package`.
	Overwrite {
		package: PackageIdentifier,
		files: Vec<String>,
	},
}

impl std::fmt::Display for Prompt {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let join = |ids: &[PackageIdentifier]| ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
		match self {
			Prompt::ContinueInstall { install, download } => write!(f, "install [{}], downloading [{}]?", join(install), join(download)),
			Prompt::ContinueRemove { packages } => write!(f, "remove [{}]?", join(packages)),
			Prompt::Overwrite { package, files } => write!(f, "overwrite {} with files from {package}?", files.join(", ")),
		}
	}
}
