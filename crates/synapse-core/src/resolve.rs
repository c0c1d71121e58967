//! Dependency resolution.
//!
//! Turns an asset reference into a verified blob: a cheap local hit when the
//! hash is already stored, otherwise ask the provider for a download URL and
//! an expected hash, then stream the bytes into the blob store with that
//! hash enforced. Unverified bytes are never accepted.

use std::fs::File;
use std::io::Read;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use synapse_cas::{BlobHash, BlobRef, BlobStore, CasError};
use synapse_config::path::is_contained_relative;
use synapse_config::{log_resolve_debug, log_resolve_warn, NetworkConfig};
use synapse_lock::LockedAsset;
use synapse_pack::{AssetRef, AssetSource};

use crate::error::{CoreError, Result};

const USER_AGENT: &str = concat!("synapse/", env!("CARGO_PKG_VERSION"));

/// What a provider knows about where to get an asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub download_url: String,
    pub sha256: BlobHash,
    pub size: Option<u64>,
    pub filename: Option<String>,
    pub version_id: Option<u64>,
    pub version_name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Resolution {
    pub fn new(download_url: impl Into<String>, sha256: BlobHash) -> Self {
        Self {
            download_url: download_url.into(),
            sha256,
            size: None,
            filename: None,
            version_id: None,
            version_name: None,
            published_at: None,
        }
    }
}

/// A published version of a dependency, as offered by its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub version_id: u64,
    pub version_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub filename: String,
    pub download_url: String,
    pub sha256: BlobHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{0}")]
    Unresolvable(String),

    /// Worth retrying (timeouts, 5xx, rate limits)
    #[error("{0}")]
    Transient(String),
}

/// Metadata lookup for asset sources. Implemented outside the core for
/// remote catalogs.
pub trait AssetProvider: Send + Sync {
    fn resolve(&self, asset: &AssetRef) -> std::result::Result<Resolution, ProviderError>;

    /// Published versions of `asset`, in any order.
    fn candidates(&self, asset: &AssetRef) -> std::result::Result<Vec<Candidate>, ProviderError> {
        let _ = asset;
        Ok(Vec::new())
    }
}

/// Resolves sources that carry everything needed in the declaration itself.
///
/// - `url` and `huggingface` sources with a declared sha256
/// - `local` files, hashed in place
///
/// Catalog sources (Civitai) need a real provider and are reported
/// unresolvable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectProvider;

impl AssetProvider for DirectProvider {
    fn resolve(&self, asset: &AssetRef) -> std::result::Result<Resolution, ProviderError> {
        let missing_hash = || {
            ProviderError::Unresolvable(format!(
                "{} source of '{}' declares no sha256",
                asset.source.kind(),
                asset.name
            ))
        };

        match &asset.source {
            AssetSource::Url { url, sha256 } => {
                let hash = sha256.clone().or_else(|| asset.sha256.clone()).ok_or_else(missing_hash)?;
                Ok(Resolution::new(url.clone(), hash))
            }
            AssetSource::Huggingface {
                repo_id,
                filename,
                revision,
                sha256,
            } => {
                let hash = sha256.clone().or_else(|| asset.sha256.clone()).ok_or_else(missing_hash)?;
                let url = format!(
                    "https://huggingface.co/{}/resolve/{}/{}",
                    repo_id,
                    revision.as_deref().unwrap_or("main"),
                    filename
                );
                Ok(Resolution::new(url, hash))
            }
            AssetSource::Local { path } => {
                let file = File::open(path).map_err(|e| {
                    ProviderError::Unresolvable(format!("cannot read {}: {}", path, e))
                })?;
                let (hash, size) = BlobHash::of_reader(file)
                    .map_err(|e| ProviderError::Transient(format!("reading {}: {}", path, e)))?;
                let url = Url::from_file_path(path).map_err(|_| {
                    ProviderError::Unresolvable(format!("local path must be absolute: {}", path))
                })?;
                let mut resolution = Resolution::new(url.to_string(), hash);
                resolution.size = Some(size);
                Ok(resolution)
            }
            AssetSource::Civitai { .. } => Err(ProviderError::Unresolvable(
                "civitai lookups need a catalog provider".to_string(),
            )),
            AssetSource::Unresolved => Err(ProviderError::Unresolvable(
                "no source declared".to_string(),
            )),
        }
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

/// Opens a byte stream for a download URL.
pub trait Fetcher: Send + Sync {
    fn open(&self, url: &str) -> std::result::Result<Box<dyn Read + Send>, FetchError>;
}

/// `http(s)://` through a blocking reqwest client, `file://` from disk.
pub struct DefaultFetcher {
    client: reqwest::blocking::Client,
}

impl DefaultFetcher {
    pub fn new(timeout: Duration) -> std::result::Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Fatal(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Fetcher for DefaultFetcher {
    fn open(&self, url: &str) -> std::result::Result<Box<dyn Read + Send>, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Fatal(format!("bad url {}: {}", url, e)))?;
        match parsed.scheme() {
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| FetchError::Fatal(format!("bad file url {}", url)))?;
                let file = File::open(&path)
                    .map_err(|e| FetchError::Fatal(format!("{}: {}", path.display(), e)))?;
                Ok(Box::new(file))
            }
            "http" | "https" => {
                let response = self.client.get(parsed).send().map_err(|e| {
                    if e.is_timeout() || e.is_connect() || e.is_request() {
                        FetchError::Transient(format!("failed to fetch {}: {}", url, e))
                    } else {
                        FetchError::Fatal(format!("failed to fetch {}: {}", url, e))
                    }
                })?;
                let status = response.status();
                if status.is_success() {
                    Ok(Box::new(response))
                } else if status.is_server_error() || status.as_u16() == 429 {
                    Err(FetchError::Transient(format!("{} returned {}", url, status)))
                } else {
                    Err(FetchError::Fatal(format!("{} returned {}", url, status)))
                }
            }
            other => Err(FetchError::Fatal(format!("unsupported scheme '{}'", other))),
        }
    }
}

/// Refuse a file name that would land outside a view once joined to its
/// asset folder. Provider metadata is not trusted on this.
pub(crate) fn check_filename(dependency: &str, filename: &str) -> Result<()> {
    if is_contained_relative(filename) {
        Ok(())
    } else {
        Err(CoreError::Unresolvable {
            dependency: dependency.to_string(),
            reason: format!("file name {:?} escapes the view", filename),
        })
    }
}

/// One resolution pass over a set of dependencies.
pub(crate) struct Resolver<'a> {
    pub blobs: &'a BlobStore,
    pub provider: &'a dyn AssetProvider,
    pub fetcher: &'a dyn Fetcher,
    pub network: &'a NetworkConfig,
}

impl Resolver<'_> {
    /// Resolve and store one dependency, returning its pin.
    pub fn resolve(&self, asset: &AssetRef) -> Result<LockedAsset> {
        if let Some(hash) = asset.known_hash() {
            if self.blobs.has(hash) {
                log_resolve_debug!("Local hit", dependency = asset.name.as_str(), sha256 = hash.short());
                let filename = asset.target_filename().to_string();
                check_filename(&asset.name, &filename)?;
                return Ok(LockedAsset {
                    sha256: hash.clone(),
                    size: self.blobs.size_of(hash)?,
                    filename,
                    asset_type: asset.asset_type,
                    download_url: None,
                    version_id: None,
                    version_name: None,
                    published_at: None,
                });
            }
        }

        let resolution = self.with_retries(&asset.name, || self.provider.resolve(asset))?;
        if let Some(declared) = asset.known_hash() {
            if *declared != resolution.sha256 {
                return Err(CoreError::IntegrityMismatch {
                    context: format!("dependency '{}' (declared vs provider)", asset.name),
                    expected: declared.clone(),
                    actual: resolution.sha256,
                });
            }
        }

        let filename = asset
            .filename
            .clone()
            .or(resolution.filename)
            .unwrap_or_else(|| asset.target_filename().to_string());
        check_filename(&asset.name, &filename)?;

        let blob = self.fetch(&asset.name, &resolution.download_url, &resolution.sha256)?;
        Ok(LockedAsset {
            sha256: blob.hash,
            size: blob.size,
            filename,
            asset_type: asset.asset_type,
            download_url: Some(resolution.download_url),
            version_id: resolution.version_id,
            version_name: resolution.version_name,
            published_at: resolution.published_at,
        })
    }

    /// Published versions of a dependency, with transient failures retried.
    pub fn candidates(&self, asset: &AssetRef) -> Result<Vec<Candidate>> {
        self.with_retries(&asset.name, || self.provider.candidates(asset))
    }

    /// Download `url` into the store, enforcing `expected`.
    ///
    /// Already stored hashes skip the network entirely.
    pub fn fetch(&self, dependency: &str, url: &str, expected: &BlobHash) -> Result<BlobRef> {
        if self.blobs.has(expected) {
            return Ok(BlobRef {
                hash: expected.clone(),
                size: self.blobs.size_of(expected)?,
                path: self.blobs.blob_path(expected),
                was_new: false,
            });
        }

        let attempts = self.network.retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                thread::sleep(self.network.retry_delay(attempt - 1));
            }

            let reader = match self.fetcher.open(url) {
                Ok(reader) => reader,
                Err(FetchError::Transient(msg)) => {
                    log_resolve_warn!("Transient fetch failure", dependency = dependency, attempt = attempt, error = msg.as_str());
                    last_error = msg;
                    continue;
                }
                Err(FetchError::Fatal(msg)) => {
                    return Err(CoreError::Unresolvable {
                        dependency: dependency.to_string(),
                        reason: msg,
                    })
                }
            };

            match self.blobs.import(reader, Some(expected)) {
                Ok(blob) => return Ok(blob),
                // Interrupted stream
                Err(CasError::Io(e)) => {
                    log_resolve_warn!("Download interrupted", dependency = dependency, attempt = attempt, error = e.to_string().as_str());
                    last_error = e.to_string();
                }
                Err(e) => return Err(CoreError::from(e).for_dependency(dependency)),
            }
        }

        Err(CoreError::Unresolvable {
            dependency: dependency.to_string(),
            reason: format!("gave up after {} attempts: {}", attempts, last_error),
        })
    }

    fn with_retries<T>(
        &self,
        dependency: &str,
        mut op: impl FnMut() -> std::result::Result<T, ProviderError>,
    ) -> Result<T> {
        let attempts = self.network.retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                thread::sleep(self.network.retry_delay(attempt - 1));
            }
            match op() {
                Ok(value) => return Ok(value),
                Err(ProviderError::Unresolvable(reason)) => {
                    return Err(CoreError::Unresolvable {
                        dependency: dependency.to_string(),
                        reason,
                    })
                }
                Err(ProviderError::Transient(reason)) => {
                    log_resolve_warn!("Transient provider failure", dependency = dependency, attempt = attempt, error = reason.as_str());
                    last_error = reason;
                }
            }
        }
        Err(CoreError::Unresolvable {
            dependency: dependency.to_string(),
            reason: format!("gave up after {} attempts: {}", attempts, last_error),
        })
    }
}
