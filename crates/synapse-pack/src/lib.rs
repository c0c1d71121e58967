//! # synapse-pack
//!
//! Pack declarations (`pack.json`).
//!
//! A pack is a named bundle of asset references. The declaration records
//! what the user intended; the pins actually resolved live in the separate
//! lock document (`synapse-lock`).

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use synapse_cas::BlobHash;
use synapse_config::path::is_contained_relative;
use synapse_layout::{read_document, validate_name, write_document, LayoutError};

#[derive(Error, Debug)]
pub enum PackError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("Pack document not found: {0}")]
    Missing(String),

    #[error("Pack '{pack}' declares dependency '{name}' more than once")]
    DuplicateDependency { pack: String, name: String },

    #[error("Dependency '{dependency}' has unusable filename {filename:?}")]
    InvalidFilename { dependency: String, filename: String },
}

pub type Result<T> = std::result::Result<T, PackError>;

/// Kind of model asset; decides the folder a UI expects it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Checkpoint,
    Lora,
    Vae,
    Controlnet,
    Upscaler,
    Embedding,
    CustomNode,
    Workflow,
    BaseModel,
    Unknown,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Checkpoint => "checkpoint",
            AssetType::Lora => "lora",
            AssetType::Vae => "vae",
            AssetType::Controlnet => "controlnet",
            AssetType::Upscaler => "upscaler",
            AssetType::Embedding => "embedding",
            AssetType::CustomNode => "custom_node",
            AssetType::Workflow => "workflow",
            AssetType::BaseModel => "base_model",
            AssetType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an asset comes from, with the fields a provider needs to find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetSource {
    Civitai {
        model_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version_id: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<u64>,
    },
    Huggingface {
        repo_id: String,
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<BlobHash>,
    },
    Local {
        path: String,
    },
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<BlobHash>,
    },
    Unresolved,
}

impl AssetSource {
    pub fn kind(&self) -> &'static str {
        match self {
            AssetSource::Civitai { .. } => "civitai",
            AssetSource::Huggingface { .. } => "huggingface",
            AssetSource::Local { .. } => "local",
            AssetSource::Url { .. } => "url",
            AssetSource::Unresolved => "unresolved",
        }
    }

    /// File name implied by the source itself, if any.
    fn implied_filename(&self) -> Option<&str> {
        match self {
            AssetSource::Huggingface { filename, .. } => filename.rsplit('/').next(),
            AssetSource::Local { path } => Path::new(path).file_name().and_then(|n| n.to_str()),
            AssetSource::Url { url, .. } => url
                .split(['?', '#'])
                .next()
                .and_then(|u| u.rsplit('/').next())
                .filter(|name| !name.is_empty()),
            AssetSource::Civitai { .. } | AssetSource::Unresolved => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    #[default]
    Unresolved,
    Resolved,
    Installed,
    Missing,
    Pending,
}

/// Whether `check` looks for newer versions of a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    #[default]
    Pinned,
    FollowLatest,
}

/// A declared dependency of a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub name: String,
    pub asset_type: AssetType,
    pub source: AssetSource,
    /// Name of the file inside the UI folder; derived from the source if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub status: AssetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<BlobHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_model_hint: Option<String>,
    #[serde(default)]
    pub update_policy: UpdatePolicy,
}

impl AssetRef {
    pub fn new(name: impl Into<String>, asset_type: AssetType, source: AssetSource) -> Self {
        Self {
            name: name.into(),
            asset_type,
            source,
            filename: None,
            status: AssetStatus::Unresolved,
            sha256: None,
            size: None,
            base_model_hint: None,
            update_policy: UpdatePolicy::Pinned,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.update_policy = policy;
        self
    }

    /// File name this asset gets inside a view, falling back to the
    /// dependency name.
    pub fn target_filename(&self) -> &str {
        self.filename
            .as_deref()
            .or_else(|| self.source.implied_filename())
            .unwrap_or(&self.name)
    }

    pub fn is_installed(&self) -> bool {
        self.status == AssetStatus::Installed
    }

    /// Hash known up front, either pinned on the reference or declared by
    /// the source.
    pub fn known_hash(&self) -> Option<&BlobHash> {
        self.sha256.as_ref().or(match &self.source {
            AssetSource::Huggingface { sha256, .. } | AssetSource::Url { sha256, .. } => {
                sha256.as_ref()
            }
            _ => None,
        })
    }
}

/// A pack declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub previews: Vec<String>,
    #[serde(default)]
    pub workflows: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<AssetRef>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Pack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            description: None,
            base_model: None,
            tags: Vec::new(),
            previews: Vec::new(),
            workflows: Vec::new(),
            dependencies: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_dependency(mut self, dep: AssetRef) -> Self {
        self.dependencies.push(dep);
        self
    }

    /// Load a declaration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        read_document(path)?.ok_or_else(|| PackError::Missing(path.display().to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        Ok(write_document(path, self)?)
    }

    /// Check names and filenames before the pack touches the store.
    pub fn validate(&self) -> Result<()> {
        validate_name("pack", &self.name)?;

        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            validate_name("dependency", &dep.name)?;
            if !seen.insert(dep.name.as_str()) {
                return Err(PackError::DuplicateDependency {
                    pack: self.name.clone(),
                    name: dep.name.clone(),
                });
            }
            let filename = dep.target_filename();
            if !is_contained_relative(filename) {
                return Err(PackError::InvalidFilename {
                    dependency: dep.name.clone(),
                    filename: filename.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn dependency(&self, name: &str) -> Option<&AssetRef> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    pub fn dependency_mut(&mut self, name: &str) -> Option<&mut AssetRef> {
        self.dependencies.iter_mut().find(|d| d.name == name)
    }

    /// True when every dependency has a blob in the store.
    pub fn is_installed(&self) -> bool {
        self.dependencies.iter().all(AssetRef::is_installed)
    }

    /// Advisory messages for dependencies whose `base_model_hint` disagrees
    /// with the pack's base model. Comparison ignores case.
    pub fn base_model_warnings(&self) -> Vec<String> {
        let Some(base) = self.base_model.as_deref() else {
            return Vec::new();
        };
        self.dependencies
            .iter()
            .filter_map(|dep| {
                let hint = dep.base_model_hint.as_deref()?;
                (!hint.eq_ignore_ascii_case(base)).then(|| {
                    format!(
                        "{} '{}' targets {}, pack base model is {}",
                        dep.asset_type, dep.name, hint, base
                    )
                })
            })
            .collect()
    }
}
