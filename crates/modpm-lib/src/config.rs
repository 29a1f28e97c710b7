//! Settings shared by every game instance.

use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	download_dir: std::path::PathBuf,
	data_dir: std::path::PathBuf,
	/// Cached archives are evicted after an install until the cache is at most this many bytes.
	cache_size_limit: Option<u64>,
	/// Destinations containing any of these substrings are never installed.
	global_install_filters: Vec<String>,
	https_only: bool,
	max_concurrent_downloads: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			download_dir: user_directory("XDG_CACHE_HOME", ".cache").join("modpm").join("downloads"),
			data_dir: user_directory("XDG_DATA_HOME", ".local/share").join("modpm").join("data"),
			cache_size_limit: None,
			global_install_filters: vec!["Thumbs.db".to_string(), ".DS_Store".to_string()],
			https_only: true,
			max_concurrent_downloads: 4,
		}
	}
}

/// Resolves the platform's per-user base directory, falling back to a relative path when the environment is bare.
fn user_directory(xdg_var: &str, home_fallback: &str) -> std::path::PathBuf {
	#[cfg(target_os = "windows")]
	{
		let _ = (xdg_var, home_fallback);
		std::env::var_os("APPDATA").map(std::path::PathBuf::from).unwrap_or_default()
	}

	#[cfg(not(target_os = "windows"))]
	{
		if let Some(e) = std::env::var_os(xdg_var) {
			std::path::PathBuf::from(e)
		} else {
			std::env::var_os("HOME").map(std::path::PathBuf::from).unwrap_or_default().join(home_fallback)
		}
	}
}

impl Config {
	/// Reads a JSON config file, missing fields take their default values.
	pub fn load_from_disk(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
		let path = path.as_ref();
		log::trace!("Loading config from {}", path.display());
		let file = std::fs::File::open(path)?;
		Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
	}

	pub fn save_to_disk(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
		let path = path.as_ref();
		log::trace!("Saving config to {}", path.display());
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let file = std::fs::File::create(path)?;
		serde_json::to_writer_pretty(file, self)?;
		Ok(())
	}

	/// Creates the download and data directories if they don't exist.
	pub fn create_directories(&self) -> crate::Result<()> {
		std::fs::create_dir_all(&self.download_dir)?;
		std::fs::create_dir_all(&self.data_dir)?;
		Ok(())
	}

	pub fn download_dir(&self) -> &std::path::Path {
		&self.download_dir
	}
	/// returns if the directory is valid or not.
	pub fn set_download_dir(&mut self, download_dir: std::path::PathBuf) -> bool {
		if download_dir.is_dir() {
			self.download_dir = download_dir;
			true
		} else {
			false
		}
	}

	pub fn data_dir(&self) -> &std::path::Path {
		&self.data_dir
	}
	/// returns if the directory is valid or not.
	pub fn set_data_dir(&mut self, data_dir: std::path::PathBuf) -> bool {
		if data_dir.is_dir() {
			self.data_dir = data_dir;
			true
		} else {
			false
		}
	}

	pub fn cache_size_limit(&self) -> Option<u64> {
		self.cache_size_limit
	}
	pub fn set_cache_size_limit(&mut self, limit: Option<u64>) {
		self.cache_size_limit = limit;
	}

	pub fn global_install_filters(&self) -> &[String] {
		&self.global_install_filters
	}
	pub fn set_global_install_filters(&mut self, filters: Vec<String>) {
		self.global_install_filters = filters;
	}

	pub fn https_only(&self) -> bool {
		self.https_only
	}
	pub fn set_https_only(&mut self, https_only: bool) {
		self.https_only = https_only;
	}

	pub fn max_concurrent_downloads(&self) -> usize {
		self.max_concurrent_downloads
	}
	pub fn set_max_concurrent_downloads(&mut self, max: usize) {
		self.max_concurrent_downloads = max.max(1);
	}
}
