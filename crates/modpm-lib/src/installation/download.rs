//! Downloads a packages content.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;

use crate::metadb::package::*;

/// Errors that can occur during the download process.
#[derive(Debug, Error)]
pub enum DownloadError {
	/// Given package cannot be downloaded as it has no download information.
	#[error("given package does not have downloadable content.")]
	PackageMissingDownloadFields,
	/// Only https downloads are allowed by the config.
	#[error("refusing to download from insecure url {0}")]
	InsecureUrl(String),
	#[error("reqwest error: {0}")]
	Reqwest(#[from] reqwest::Error),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
}

#[derive(Debug)]
pub enum DownloadEvent {
	Progress {
		package: PackageIdentifier,
		bytes_left: u64,
	},
	Complete {
		package: PackageIdentifier,
		path: PathBuf,
	},
	Failed {
		package: PackageIdentifier,
		error: DownloadError,
	},
}

/// Fetches package archives.
///
/// Implementations report every package exactly once with either [`DownloadEvent::Complete`]
/// or [`DownloadEvent::Failed`], any number of [`DownloadEvent::Progress`] may come before.
/// The channel closes once every package has been reported.
pub trait Downloader {
	fn download_all(&self, packages: Vec<Package>) -> UnboundedReceiver<DownloadEvent>;
}

pub fn get_package_download_path(config: &crate::Config, id: &PackageIdentifier) -> PathBuf {
	config.download_dir().join(format!("{}-{}.zip", id.identifier, id.version))
}

/// Downloads over http using `reqwest`, a limited number at a time.
///
/// Must be used from within a tokio runtime.
pub struct HttpDownloader {
	client: reqwest::Client,
	config: Arc<crate::Config>,
	limit: Arc<Semaphore>,
}

impl HttpDownloader {
	pub fn new(config: &crate::Config) -> Result<Self, DownloadError> {
		let client = reqwest::Client::builder().build()?;

		Ok(Self {
			client,
			config: Arc::new(config.clone()),
			limit: Arc::new(Semaphore::new(config.max_concurrent_downloads().max(1))),
		})
	}
}

impl Downloader for HttpDownloader {
	fn download_all(&self, packages: Vec<Package>) -> UnboundedReceiver<DownloadEvent> {
		let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

		for package in packages {
			let client = self.client.clone();
			let config = self.config.clone();
			let limit = self.limit.clone();
			let tx = tx.clone();

			tokio::spawn(async move {
				/* A closed semaphore only happens on shutdown, nothing left to report to */
				let Ok(_permit) = limit.acquire_owned().await else { return };
				let event = match download_package(&client, &config, &package, &tx).await {
					Ok(path) => DownloadEvent::Complete { package: package.identifier.clone(), path },
					Err(error) => {
						log::warn!("Download of {} failed: {}", package.identifier, error);
						DownloadEvent::Failed { package: package.identifier.clone(), error }
					},
				};
				let _ = tx.send(event);
			});
		}

		rx
	}
}

/// Tries each download locator of the package in turn.
async fn download_package(client: &reqwest::Client, config: &crate::Config, package: &Package, tx: &UnboundedSender<DownloadEvent>) -> Result<PathBuf, DownloadError> {
	let download_path = get_package_download_path(config, &package.identifier);
	let mut last_error = DownloadError::PackageMissingDownloadFields;

	for url in &package.download {
		if config.https_only() && !url.starts_with("https://") {
			last_error = DownloadError::InsecureUrl(url.clone());
			continue;
		}

		log::info!("Downloading package {} from {}", package.identifier, url);
		match download_url(client, url, &download_path, package, tx).await {
			Ok(()) => return Ok(download_path),
			Err(e) => {
				log::warn!("Failed to download {} from {}: {}", package.identifier, url, e);
				let _ = tokio::fs::remove_file(&download_path).await;
				last_error = e;
			},
		}
	}

	Err(last_error)
}

async fn download_url(client: &reqwest::Client, url: &str, dest: &std::path::Path, package: &Package, tx: &UnboundedSender<DownloadEvent>) -> Result<(), DownloadError> {
	let mut response = client.get(url).send().await?.error_for_status()?;
	let mut bytes_left = response.content_length().unwrap_or(package.download_size);

	if let Some(parent) = dest.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	let mut file = tokio::fs::File::create(dest).await?;

	while let Some(chunk) = response.chunk().await? {
		file.write_all(&chunk).await?;
		bytes_left = bytes_left.saturating_sub(chunk.len() as u64);
		let _ = tx.send(DownloadEvent::Progress { package: package.identifier.clone(), bytes_left });
	}
	file.flush().await?;

	log::trace!("Wrote package download to disk: {}", dest.display());
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn download_path_includes_version() {
		let config = crate::Config::default();
		let path = get_package_download_path(&config, &PackageIdentifier::new("A", "1.0"));
		assert!(path.ends_with("A-1.0.zip"));
	}

	#[tokio::test]
	async fn insecure_urls_are_refused() {
		let config = crate::Config::default();
		let mut package = Package::new("A", "1.0");
		package.download = vec!["http://example.com/a.zip".to_string()];

		let mut rx = HttpDownloader::new(&config).unwrap().download_all(vec![package]);
		match rx.recv().await {
			Some(DownloadEvent::Failed { error: DownloadError::InsecureUrl(_), .. }) => {},
			e => panic!("unexpected event {:?}", e),
		}
		assert!(rx.recv().await.is_none());
	}

	#[tokio::test]
	async fn packages_without_locators_fail() {
		let config = crate::Config::default();
		let mut rx = HttpDownloader::new(&config).unwrap().download_all(vec![Package::new("A", "1.0")]);
		assert!(matches!(rx.recv().await, Some(DownloadEvent::Failed { error: DownloadError::PackageMissingDownloadFields, .. })));
	}
}
