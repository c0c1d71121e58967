#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use synapse_cas::BlobHash;
use synapse_config::testing::TestEnvironment;
use synapse_core::{
    AssetProvider, Candidate, DefaultFetcher, DirectProvider, Library, ProviderError, Resolution,
};
use synapse_pack::{AssetRef, AssetSource, AssetType, Pack};

pub const UI: &str = "comfyui";

/// Direct resolution plus the versions published so far per dependency.
#[derive(Clone, Default)]
pub struct Catalog {
    versions: Arc<Mutex<Vec<(String, Candidate)>>>,
}

impl Catalog {
    pub fn publish(&self, dependency: &str, candidate: Candidate) {
        self.versions
            .lock()
            .unwrap()
            .push((dependency.to_string(), candidate));
    }
}

impl AssetProvider for Catalog {
    fn resolve(&self, asset: &AssetRef) -> Result<Resolution, ProviderError> {
        DirectProvider.resolve(asset)
    }

    fn candidates(&self, asset: &AssetRef) -> Result<Vec<Candidate>, ProviderError> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|(dep, _)| *dep == asset.name)
            .map(|(_, c)| c.clone())
            .collect())
    }
}

pub struct Fixture {
    pub env: TestEnvironment,
    pub lib: Library,
    pub catalog: Catalog,
}

impl Fixture {
    pub fn new() -> Self {
        let env = TestEnvironment::new().unwrap();
        let catalog = Catalog::default();
        let lib = open(&env, catalog.clone());
        Self { env, lib, catalog }
    }

    /// A `url` dependency served from a local file, with its hash declared.
    pub fn asset(&self, name: &str, asset_type: AssetType, filename: &str, content: &[u8]) -> AssetRef {
        let hash = BlobHash::of_bytes(content);
        let source = format!("{}/{}", hash.short(), filename);
        self.env.create_file(&source, content).unwrap();
        AssetRef::new(
            name,
            asset_type,
            AssetSource::Url {
                url: self.env.file_url(&source),
                sha256: Some(hash),
            },
        )
        .with_filename(filename)
    }

    /// A published version of a file, written to the source directory.
    pub fn candidate(&self, id: &str, version_id: u64, filename: &str, content: &[u8]) -> Candidate {
        let source = format!("v{}/{}", version_id, filename);
        self.env.create_file(&source, content).unwrap();
        Candidate {
            id: id.to_string(),
            version_id,
            version_name: format!("v{}", version_id),
            published_at: None,
            filename: filename.to_string(),
            download_url: self.env.file_url(&source),
            sha256: BlobHash::of_bytes(content),
            size: Some(content.len() as u64),
        }
    }

    /// Import and install a pack with the given dependencies.
    pub fn install(&self, name: &str, deps: Vec<AssetRef>) {
        let pack = deps.into_iter().fold(Pack::new(name), Pack::with_dependency);
        self.lib.import_pack(pack, false).unwrap();
        self.lib.install_pack(name).unwrap();
    }

    /// Path of a file as the UI sees it through `active`.
    pub fn active_file(&self, rel: &str) -> PathBuf {
        self.lib.layout().active_link(UI).join(rel)
    }

    pub fn read_active(&self, rel: &str) -> Vec<u8> {
        fs::read(self.active_file(rel)).unwrap()
    }
}

pub fn open(env: &TestEnvironment, catalog: Catalog) -> Library {
    let config = env.config();
    let fetcher = DefaultFetcher::new(config.network.timeout()).unwrap();
    Library::open_with(config, Box::new(catalog), Box::new(fetcher)).unwrap()
}
