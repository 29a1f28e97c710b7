//! # Deployment
//!
//! Maps the contents of a package archive onto the game directory.
//!
//! Each install stanza is turned into a list of [`InstallableFile`]s. `find` and `find_regexp`
//! stanzas are first narrowed to the shortest matching path in the archive, after which every
//! stanza behaves like a `file` stanza: the matched path and everything below it is installed
//! into `install_to`, keeping the matched name unless renamed with `as`.

use std::collections::{BTreeSet, HashSet};
use std::io::Read;
use std::path::Path;

use crate::metadb::package::*;

#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("zip error: {0}")]
	Zip(#[from] zip::result::ZipError),
	#[error("invalid regular expression: {0}")]
	InvalidRegex(#[from] regex::Error),
	/// A stanza didn't match anything in the archive.
	#[error("could not find {stanza} in the archive of {package}")]
	NothingMatched {
		package: PackageIdentifier,
		stanza: String,
	},
	#[error("install destination {0} is outside the game directory")]
	InvalidInstallTo(String),
	/// An archive path, or the destination built from it, would leave the game directory.
	#[error("{0} would be installed outside the game directory")]
	UnsafePath(String),
}

/// A file or directory inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
	/// Position within the archive.
	pub index: usize,
	/// Path with `/` separators and no trailing slash.
	pub path: String,
	pub is_dir: bool,
	pub size: u64,
}

impl ArchiveEntry {
	pub fn new(index: usize, path: impl AsRef<str>, is_dir: bool, size: u64) -> Self {
		let path = path.as_ref().replace('\\', "/").trim_end_matches('/').to_string();
		Self { index, path, is_dir, size }
	}
}

/// Read access to a package archive.
pub trait ArchiveReader {
	fn entries(&self) -> &[ArchiveEntry];
	/// Copies the contents of a file entry to `writer`, returning the number of bytes copied.
	fn copy_entry(&mut self, entry: &ArchiveEntry, writer: &mut dyn std::io::Write) -> Result<u64, DeploymentError>;
	/// Checks whether the file at `path` holds exactly the contents of the entry.
	fn entry_matches(&mut self, entry: &ArchiveEntry, path: &Path) -> Result<bool, DeploymentError>;
}

pub struct ZipArchiveReader {
	archive: zip::ZipArchive<std::fs::File>,
	entries: Vec<ArchiveEntry>,
}

impl ZipArchiveReader {
	pub fn open(path: &Path) -> Result<Self, DeploymentError> {
		log::trace!("Opening archive {}", path.display());
		let mut archive = zip::ZipArchive::new(std::fs::File::open(path)?)?;
		let mut entries = Vec::<ArchiveEntry>::with_capacity(archive.len());
		for i in 0..archive.len() {
			let file = archive.by_index(i)?;
			entries.push(ArchiveEntry::new(i, file.name(), file.is_dir(), file.size()));
		}
		Ok(Self { archive, entries })
	}
}

impl ArchiveReader for ZipArchiveReader {
	fn entries(&self) -> &[ArchiveEntry] {
		&self.entries
	}

	fn copy_entry(&mut self, entry: &ArchiveEntry, writer: &mut dyn std::io::Write) -> Result<u64, DeploymentError> {
		let mut file = self.archive.by_index(entry.index)?;
		Ok(std::io::copy(&mut file, writer)?)
	}

	fn entry_matches(&mut self, entry: &ArchiveEntry, path: &Path) -> Result<bool, DeploymentError> {
		let meta = std::fs::metadata(path)?;
		if !meta.is_file() || meta.len() != entry.size {
			return Ok(false)
		}

		let mut ours = self.archive.by_index(entry.index)?;
		let mut theirs = std::io::BufReader::new(std::fs::File::open(path)?);
		let mut lhs = [0u8; 8192];
		let mut rhs = [0u8; 8192];
		loop {
			let read = ours.read(&mut lhs)?;
			if read == 0 {
				return Ok(theirs.read(&mut rhs[..1])? == 0)
			}
			theirs.read_exact(&mut rhs[..read])?;
			if lhs[..read] != rhs[..read] {
				return Ok(false)
			}
		}
	}
}

/// An archive entry and where it goes, relative to the game directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallableFile {
	pub source: ArchiveEntry,
	/// Path relative to the game directory with `/` separators.
	pub destination: String,
	pub is_dir: bool,
}

/// Evaluates the install stanzas of the package against the archive entries.
///
/// Package metadata files (`*.ckan`) are never included. Destinations are unique, the first
/// stanza to claim a destination wins.
///
/// # Errors
/// [`DeploymentError::NothingMatched`] when a stanza matches nothing in the archive.
pub fn find_installable_files(package: &Package, entries: &[ArchiveEntry]) -> Result<Vec<InstallableFile>, DeploymentError> {
	log::trace!("Getting install instructions for package {}", package.identifier);
	let mut files = Vec::<InstallableFile>::new();
	let mut seen = HashSet::<String>::new();

	for directive in package.install_directives().iter() {
		for file in process_directive(package, directive, entries)? {
			if seen.insert(file.destination.clone()) {
				files.push(file);
			}
		}
	}

	Ok(files)
}

fn process_directive(package: &Package, directive: &InstallDirective, entries: &[ArchiveEntry]) -> Result<Vec<InstallableFile>, DeploymentError> {
	let install_to = install_destination(&directive.install_to)?;

	let matched = match &directive.source {
		SourceDirective::File(path) => Some(path.replace('\\', "/").trim_end_matches('/').to_string()),
		SourceDirective::Find(name) => {
			let pattern = format!("(?:^|/){}$", regex::escape(name));
			find_shortest(&regex::RegexBuilder::new(&pattern).case_insensitive(true).build()?, entries, directive.find_matches_files())
		},
		SourceDirective::FindRegExp(pattern) => {
			find_shortest(&regex::RegexBuilder::new(pattern).case_insensitive(true).build()?, entries, directive.find_matches_files())
		},
	};
	let Some(matched) = matched else {
		return Err(DeploymentError::NothingMatched { package: package.identifier.clone(), stanza: source_name(&directive.source) })
	};

	let filter = Filter::new(directive)?;
	let name = directive.rename()
		.map(str::to_string)
		.unwrap_or_else(|| matched.rsplit('/').next().unwrap_or(&matched).to_string());
	let base = if install_to.is_empty() { name } else { format!("{install_to}/{name}") };

	let mut files = Vec::<InstallableFile>::new();
	for entry in entries {
		let rest = if entry.path == matched {
			""
		} else if let Some(rest) = entry.path.strip_prefix(&matched).and_then(|r| r.strip_prefix('/')) {
			rest
		} else {
			continue
		};

		if entry.path.to_ascii_lowercase().ends_with(".ckan") { continue; }
		if !filter.is_wanted(&entry.path) { continue; }

		let destination = if rest.is_empty() { base.clone() } else { format!("{base}/{rest}") };
		if !is_enclosed(&entry.path) || !is_enclosed(&destination) {
			return Err(DeploymentError::UnsafePath(entry.path.clone()))
		}
		files.push(InstallableFile { source: entry.clone(), destination, is_dir: entry.is_dir });
	}

	if files.is_empty() {
		return Err(DeploymentError::NothingMatched { package: package.identifier.clone(), stanza: source_name(&directive.source) })
	}

	Ok(files)
}

/// The shortest archive path matching `regex`.
///
/// Directories are implied by the paths of the entries below them, archives don't always have
/// entries for directories.
fn find_shortest(regex: &regex::Regex, entries: &[ArchiveEntry], match_files: bool) -> Option<String> {
	let mut candidates = BTreeSet::<&str>::new();
	for entry in entries {
		if entry.is_dir || match_files {
			candidates.insert(&entry.path);
		}
		let mut path = entry.path.as_str();
		while let Some((parent, _)) = path.rsplit_once('/') {
			candidates.insert(parent);
			path = parent;
		}
	}

	candidates.into_iter()
		.filter(|c| regex.is_match(c))
		.min_by_key(|c| c.len())
		.map(str::to_string)
}

/// Checks that a `/` separated relative path stays below the directory it is joined to.
pub fn is_enclosed(path: &str) -> bool {
	!path.is_empty() &&
	!path.starts_with('/') &&
	path.split('/').all(|c| c != ".." && !c.contains(':'))
}

fn install_destination(install_to: &str) -> Result<String, DeploymentError> {
	if install_to == "GameRoot" {
		return Ok(String::new())
	}

	let normalized = install_to.replace('\\', "/");
	let normalized = normalized.trim_matches('/');
	if Path::new(install_to).is_absolute() || normalized.split('/').any(|c| c == "..") {
		return Err(DeploymentError::InvalidInstallTo(install_to.to_string()))
	}
	Ok(normalized.to_string())
}

fn source_name(source: &SourceDirective) -> String {
	match source {
		SourceDirective::File(s) | SourceDirective::Find(s) | SourceDirective::FindRegExp(s) => s.clone(),
	}
}

/// The `filter` and `include_only` options of a stanza.
#[derive(Default)]
struct Filter {
	exclude: Vec<String>,
	exclude_regex: Vec<regex::Regex>,
	include: Vec<String>,
	include_regex: Vec<regex::Regex>,
}

impl Filter {
	fn new(directive: &InstallDirective) -> Result<Self, DeploymentError> {
		let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
		let compile = |v: &[String]| v.iter().map(|s| regex::Regex::new(s)).collect::<Result<Vec<_>, _>>();

		let mut filter = Filter::default();
		for option in &directive.additional {
			match option {
				OptionalDirective::Filter(v) => filter.exclude.extend(lower(v)),
				OptionalDirective::FilterRegExp(v) => filter.exclude_regex.extend(compile(v)?),
				OptionalDirective::IncludeOnly(v) => filter.include.extend(lower(v)),
				OptionalDirective::IncludeOnlyRegExp(v) => filter.include_regex.extend(compile(v)?),
				OptionalDirective::As(_) | OptionalDirective::FindMatchesFiles(_) => {},
			}
		}
		Ok(filter)
	}

	fn is_wanted(&self, path: &str) -> bool {
		let lower = path.to_lowercase();
		let segments = lower.split('/').collect::<Vec<_>>();

		if self.exclude.iter().any(|f| segments.contains(&f.as_str())) { return false; }
		if self.exclude_regex.iter().any(|r| r.is_match(path)) { return false; }

		if self.include.is_empty() && self.include_regex.is_empty() {
			return true
		}
		self.include.iter().any(|f| segments.contains(&f.as_str())) ||
		self.include_regex.iter().any(|r| r.is_match(path))
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn entries(paths: &[&str]) -> Vec<ArchiveEntry> {
		paths.iter().enumerate().map(|(i, p)| ArchiveEntry::new(i, p, p.ends_with('/'), 1)).collect()
	}

	fn destinations(package: &Package, paths: &[&str]) -> Vec<String> {
		let mut d = find_installable_files(package, &entries(paths)).unwrap()
			.into_iter()
			.filter(|f| !f.is_dir)
			.map(|f| f.destination)
			.collect::<Vec<_>>();
		d.sort();
		d
	}

	fn with_stanza(source: SourceDirective, install_to: &str, additional: Vec<OptionalDirective>) -> Package {
		let mut p = Package::new("Foo", "1.0");
		p.install = vec![InstallDirective::new(source, install_to, additional)];
		p
	}

	#[test]
	fn default_stanza_finds_top_level_directory() {
		let p = Package::new("Foo", "1.0");
		assert_eq!(destinations(&p, &["Foo-1.0/GameData/Foo/a.cfg", "Foo-1.0/GameData/Foo/Sub/Foo/b.cfg", "Foo-1.0/README.md"]),
			["GameData/Foo/Sub/Foo/b.cfg", "GameData/Foo/a.cfg"]);
	}

	#[test]
	fn find_is_case_insensitive() {
		let p = Package::new("Foo", "1.0");
		assert_eq!(destinations(&p, &["GameData/FOO/a.cfg"]), ["GameData/FOO/a.cfg"]);
	}

	#[test]
	fn find_ignores_partial_names() {
		let p = Package::new("Foo", "1.0");
		assert!(matches!(find_installable_files(&p, &entries(&["FooBar/a.cfg"])), Err(DeploymentError::NothingMatched { .. })));
	}

	#[test]
	fn find_matches_files_when_asked() {
		let p = with_stanza(SourceDirective::Find("plugin.dll".into()), "GameData", vec![OptionalDirective::FindMatchesFiles(true)]);
		assert_eq!(destinations(&p, &["x/plugin.dll"]), ["GameData/plugin.dll"]);
	}

	#[test]
	fn file_stanza_with_rename() {
		let p = with_stanza(SourceDirective::File("Ships/VAB/Craft.craft".into()), "Ships/VAB", vec![OptionalDirective::As("Renamed.craft".into())]);
		assert_eq!(destinations(&p, &["Ships/VAB/Craft.craft"]), ["Ships/VAB/Renamed.craft"]);
	}

	#[test]
	fn game_root_installs_at_top_level() {
		let p = with_stanza(SourceDirective::File("Tool".into()), "GameRoot", vec![]);
		assert_eq!(destinations(&p, &["Tool/tool.exe"]), ["Tool/tool.exe"]);
	}

	#[test]
	fn parent_traversal_is_rejected() {
		let p = with_stanza(SourceDirective::File("Tool".into()), "GameData/../..", vec![]);
		assert!(matches!(find_installable_files(&p, &entries(&["Tool/a"])), Err(DeploymentError::InvalidInstallTo(_))));
	}

	#[test]
	fn filters_remove_segments() {
		let p = with_stanza(SourceDirective::Find("Foo".into()), "GameData", vec![
			OptionalDirective::Filter(vec!["source".into()]),
			OptionalDirective::FilterRegExp(vec![r"\.pdb$".into()]),
		]);
		assert_eq!(destinations(&p, &["Foo/a.dll", "Foo/a.pdb", "Foo/Source/a.cs"]), ["GameData/Foo/a.dll"]);
	}

	#[test]
	fn include_only_keeps_matches() {
		let p = with_stanza(SourceDirective::Find("Foo".into()), "GameData", vec![OptionalDirective::IncludeOnlyRegExp(vec![r"\.cfg$".into()])]);
		assert_eq!(destinations(&p, &["Foo/a.cfg", "Foo/b.dll"]), ["GameData/Foo/a.cfg"]);
	}

	#[test]
	fn metadata_files_are_skipped() {
		let p = Package::new("Foo", "1.0");
		assert_eq!(destinations(&p, &["Foo/a.cfg", "Foo/Foo.ckan"]), ["GameData/Foo/a.cfg"]);
	}

	#[test]
	fn traversal_in_archive_is_rejected() {
		let p = Package::new("Foo", "1.0");
		let result = find_installable_files(&p, &entries(&["Foo/a.cfg", "Foo/../../../evil.txt"]));
		assert!(matches!(result, Err(DeploymentError::UnsafePath(path)) if path == "Foo/../../../evil.txt"));
	}

	#[test]
	fn traversal_in_rename_is_rejected() {
		let p = with_stanza(SourceDirective::File("Foo/a.cfg".into()), "GameData", vec![OptionalDirective::As("../../a.cfg".into())]);
		assert!(matches!(find_installable_files(&p, &entries(&["Foo/a.cfg"])), Err(DeploymentError::UnsafePath(_))));
	}

	#[test] fn enclosed_paths() { assert!(is_enclosed("GameData/Foo/a.cfg") && !is_enclosed("/etc/passwd") && !is_enclosed("C:/x") && !is_enclosed("a/../../b")) }

	#[test]
	fn bad_regex_is_error() {
		let p = with_stanza(SourceDirective::FindRegExp("(".into()), "GameData", vec![]);
		assert!(matches!(find_installable_files(&p, &entries(&["Foo/a"])), Err(DeploymentError::InvalidRegex(_))));
	}
}
