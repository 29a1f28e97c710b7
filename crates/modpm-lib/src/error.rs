//! Library error type.
//!
//! Operations with their own failure domains (resolution, install, uninstall) use the
//! dedicated error enums in their modules, this covers configuration and persistence.

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
	#[error("bincode error: {0}")]
	Bincode(#[from] bincode::Error),
	#[error("parsing error: {0}")]
	Parse(String),
	#[error("registry is inconsistent: {}", .0.join("; "))]
	Inconsistent(Vec<String>),
}
