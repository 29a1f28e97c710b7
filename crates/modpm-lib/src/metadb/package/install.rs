//! Install stanzas describing how the contents of a package archive map onto the game directory.

use serde::*;

/// Where the files of a stanza come from inside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceDirective {
	/// An exact path inside the archive, a file or a directory.
	File(String),
	/// The shortest directory whose final component matches, case-insensitively.
	Find(String),
	/// The shortest directory whose path matches the regular expression.
	FindRegExp(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionalDirective {
	/// Rename the matched file or directory at its destination.
	As(String),
	/// Skip entries with a path component equal to any of these.
	Filter(Vec<String>),
	FilterRegExp(Vec<String>),
	/// Keep only entries with a path component equal to any of these.
	IncludeOnly(Vec<String>),
	IncludeOnlyRegExp(Vec<String>),
	/// `find` and `find_regexp` also match files, not just directories.
	FindMatchesFiles(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallDirective {
	pub source: SourceDirective,
	/// Destination relative to the game directory, `"GameRoot"` being the game directory itself.
	pub install_to: String,
	pub additional: Vec<OptionalDirective>,
}

impl InstallDirective {
	pub fn new(source: SourceDirective, install_to: impl Into<String>, additional: Vec<OptionalDirective>) -> Self {
		Self { source, install_to: install_to.into(), additional }
	}

	/// The stanza used when a package declares none, the top-most directory named after the package into `GameData`.
	pub fn default_for(identifier: &str) -> Self {
		Self::new(SourceDirective::Find(identifier.to_string()), "GameData", Default::default())
	}

	pub fn find_matches_files(&self) -> bool {
		self.additional.iter().any(|e| matches!(e, OptionalDirective::FindMatchesFiles(true)))
	}

	pub fn rename(&self) -> Option<&str> {
		self.additional.iter().find_map(|e| match e {
			OptionalDirective::As(name) => Some(name.as_str()),
			_ => None,
		})
	}
}
