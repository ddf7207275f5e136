//! Data packages as the push pipeline sees them.
//!
//! A [`Dataset`] is a descriptor plus its [`Resource`]s. Each resource knows
//! where its bytes live ([`ResourceSource`]), how many there are, and their
//! base64 MD5 digest, which is what the rawstore uses to content-address
//! uploads.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

/// Name and path of the synthetic resource carrying the descriptor itself.
pub const DATAPACKAGE_JSON: &str = "datapackage.json";

pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse descriptor {}: {source}", .path.display())]
    Descriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid descriptor: {0}")]
    Invalid(String),

    #[error("Invalid remote resource URL {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Remote resource {url} has no local content")]
    NotLocal { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    Local,
    Remote,
}

/// CSV dialect as declared in a resource descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_char: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escape_char: Option<String>,
}

impl Dialect {
    /// True when reading with this dialect is the same as plain CSV.
    pub fn is_default(&self) -> bool {
        self.delimiter.as_deref().map_or(true, |d| d == ",")
            && self.quote_char.as_deref().map_or(true, |q| q == "\"")
            && self.escape_char.is_none()
    }
}

/// Where the bytes of a resource come from.
#[derive(Debug, Clone)]
pub enum ResourceSource {
    Local(PathBuf),
    Remote(Url),
    Inline(Bytes),
}

#[derive(Debug, Clone)]
pub struct Resource {
    descriptor: Value,
    name: String,
    path: String,
    source: ResourceSource,
    size: u64,
    hash: String,
}

impl Resource {
    /// A local file resource. `descriptor.path` is resolved against `base_path`.
    pub async fn local(descriptor: Value, base_path: &Path) -> Result<Self, PackageError> {
        let path = descriptor_path(&descriptor)?;
        let file_path = base_path.join(&path);
        let (size, hash) = digest_file(&file_path).await?;
        debug!(path = %path, size, hash = %hash, "Hashed local resource");
        Ok(Resource {
            name: resource_name(&descriptor, &path),
            descriptor,
            path,
            source: ResourceSource::Local(file_path),
            size,
            hash,
        })
    }

    /// A resource whose bytes live at a remote URL. Remote resources are never
    /// uploaded, so size and hash stay empty.
    pub fn remote(descriptor: Value) -> Result<Self, PackageError> {
        let path = descriptor_path(&descriptor)?;
        let url = Url::parse(&path).map_err(|source| PackageError::Url {
            url: path.clone(),
            source,
        })?;
        Ok(Resource {
            name: resource_name(&descriptor, &path),
            descriptor,
            path,
            source: ResourceSource::Remote(url),
            size: 0,
            hash: String::new(),
        })
    }

    /// An in-memory resource.
    pub fn inline(name: &str, path: &str, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let hash = general_purpose::STANDARD.encode(Md5::digest(&data));
        Resource {
            descriptor: serde_json::json!({ "name": name, "path": path }),
            name: name.to_owned(),
            path: path.to_owned(),
            size: data.len() as u64,
            hash,
            source: ResourceSource::Inline(data),
        }
    }

    /// The `datapackage.json` pseudo-resource holding the serialised descriptor.
    pub fn datapackage_json(descriptor: &Value) -> Result<Self, serde_json::Error> {
        let data = serde_json::to_vec(descriptor)?;
        Ok(Resource::inline(DATAPACKAGE_JSON, DATAPACKAGE_JSON, data))
    }

    pub fn descriptor(&self) -> &Value {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical path from the descriptor; a relative path or a URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn path_type(&self) -> PathType {
        match self.source {
            ResourceSource::Remote(_) => PathType::Remote,
            _ => PathType::Local,
        }
    }

    pub fn source(&self) -> &ResourceSource {
        &self.source
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Base64-encoded MD5 of the content.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Declared format, or the lowercase extension of the path.
    pub fn format(&self) -> Option<String> {
        self.descriptor
            .get("format")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .or_else(|| {
                let path = self.path.split(['?', '#']).next().unwrap_or_default();
                Path::new(path)
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(str::to_lowercase)
            })
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.descriptor
            .get("dialect")
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// The final component of the path, used as the uploaded file name.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Stream the content in chunks without loading it whole. Remote content is
    /// fetched through [`crate::contract::DataHubApi::fetch`] instead.
    pub async fn stream(&self) -> Result<ByteStream, PackageError> {
        match &self.source {
            ResourceSource::Local(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|source| PackageError::Io {
                        path: path.clone(),
                        source,
                    })?;
                Ok(ReaderStream::new(file).boxed())
            }
            ResourceSource::Inline(data) => {
                let data = data.clone();
                Ok(stream::once(async move { Ok(data) }).boxed())
            }
            ResourceSource::Remote(url) => Err(PackageError::NotLocal {
                url: url.to_string(),
            }),
        }
    }

    /// Read the whole content into memory. Fails for remote resources.
    pub async fn bytes(&self) -> Result<Bytes, PackageError> {
        match &self.source {
            ResourceSource::Local(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|source| PackageError::Io {
                    path: path.clone(),
                    source,
                }),
            ResourceSource::Inline(data) => Ok(data.clone()),
            ResourceSource::Remote(url) => Err(PackageError::NotLocal {
                url: url.to_string(),
            }),
        }
    }
}

fn descriptor_path(descriptor: &Value) -> Result<String, PackageError> {
    descriptor
        .get("path")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| PackageError::Invalid(format!("resource without a path: {descriptor}")))
}

fn resource_name(descriptor: &Value, path: &str) -> String {
    descriptor
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| {
            let file = path.rsplit('/').next().unwrap_or(path);
            Path::new(file)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(file)
                .to_owned()
        })
}

fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

async fn digest_file(path: &Path) -> Result<(u64, String), PackageError> {
    let io_err = |source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = tokio::fs::File::open(path).await.map_err(io_err)?;
    let (size, hasher) = ReaderStream::new(file)
        .try_fold((0u64, Md5::new()), |(size, mut hasher), chunk| async move {
            hasher.update(&chunk);
            Ok((size + chunk.len() as u64, hasher))
        })
        .await
        .map_err(io_err)?;
    Ok((size, general_purpose::STANDARD.encode(hasher.finalize())))
}

#[derive(Debug, Clone)]
pub struct Dataset {
    descriptor: Value,
    resources: Vec<Resource>,
}

impl Dataset {
    /// Load `<dir>/datapackage.json` and every resource it declares.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, PackageError> {
        let dir = dir.as_ref();
        let descriptor_path = dir.join(DATAPACKAGE_JSON);
        info!(path = %descriptor_path.display(), "Loading data package");
        let content = tokio::fs::read(&descriptor_path)
            .await
            .map_err(|source| PackageError::Io {
                path: descriptor_path.clone(),
                source,
            })?;
        let descriptor: Value =
            serde_json::from_slice(&content).map_err(|source| PackageError::Descriptor {
                path: descriptor_path,
                source,
            })?;
        Dataset::from_descriptor(descriptor, dir).await
    }

    /// Build a dataset from an in-memory descriptor; local paths resolve
    /// against `base_path`.
    pub async fn from_descriptor(descriptor: Value, base_path: &Path) -> Result<Self, PackageError> {
        if !descriptor.is_object() {
            return Err(PackageError::Invalid("descriptor must be a JSON object".into()));
        }
        let declared = descriptor
            .get("resources")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut resources = Vec::with_capacity(declared.len());
        for res in declared {
            if let Some(data) = res.get("data") {
                let path = res
                    .get("path")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| {
                        format!("{}.json", res.get("name").and_then(Value::as_str).unwrap_or("inline"))
                    });
                let bytes = serde_json::to_vec(data).map_err(|e| PackageError::Invalid(e.to_string()))?;
                let mut inline = Resource::inline(&resource_name(&res, &path), &path, bytes);
                inline.descriptor = res;
                resources.push(inline);
                continue;
            }
            let path = descriptor_path(&res)?;
            if is_remote(&path) {
                resources.push(Resource::remote(res)?);
            } else {
                resources.push(Resource::local(res, base_path).await?);
            }
        }

        info!(resources = resources.len(), "Data package loaded");
        Ok(Dataset {
            descriptor,
            resources,
        })
    }

    pub fn descriptor(&self) -> &Value {
        &self.descriptor
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn name(&self) -> Option<&str> {
        self.descriptor.get("name").and_then(Value::as_str)
    }
}
