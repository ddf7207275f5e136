//! Flow files: YAML processing specs written by hand.
//!
//! A flow already carries everything except the signed descriptor URL, so a
//! flow push only uploads `datapackage.json` and patches `inputs[0]` before
//! submitting. The document is kept as generic JSON so keys this crate does
//! not know about still reach the source service.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::options::Findability;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Failed to read flow file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't read \"flow.yaml\". Please, check if it's correctly formatted")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Flow file has no inputs[0] to attach the data package to")]
    MissingInput,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    document: Value,
}

impl Flow {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| FlowError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let flow = Flow::parse(&content).map_err(|source| FlowError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded flow file");
        Ok(flow)
    }

    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let document: Value = serde_yaml::from_str(yaml)?;
        Ok(Flow { document })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn dataset(&self) -> Option<&str> {
        self.document.pointer("/meta/dataset").and_then(Value::as_str)
    }

    pub fn findability(&self) -> Findability {
        self.document
            .pointer("/meta/findability")
            .and_then(Value::as_str)
            .map(Findability::normalize)
            .unwrap_or_default()
    }

    /// Fails unless `inputs[0]` is an object that can be patched.
    pub fn check_input(&self) -> Result<(), FlowError> {
        self.document
            .pointer("/inputs/0")
            .filter(|input| input.is_object())
            .map(|_| ())
            .ok_or(FlowError::MissingInput)
    }

    fn input_parameters(&self) -> Option<&Map<String, Value>> {
        self.document
            .pointer("/inputs/0/parameters")
            .and_then(Value::as_object)
    }

    /// The descriptor embedded in `inputs[0].parameters.descriptor`.
    pub fn descriptor(&self) -> Option<&Value> {
        self.input_parameters().and_then(|p| p.get("descriptor"))
    }

    /// Keys of `inputs[0].parameters["resource-mapping"]`.
    pub fn mapped_resources(&self) -> Vec<String> {
        self.input_parameters()
            .and_then(|p| p.get("resource-mapping"))
            .and_then(Value::as_object)
            .map(|mapping| mapping.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Point `inputs[0]` at the uploaded descriptor.
    pub fn attach_descriptor(&mut self, url: String, descriptor: Value) -> Result<(), FlowError> {
        let input = self
            .document
            .pointer_mut("/inputs/0")
            .and_then(Value::as_object_mut)
            .ok_or(FlowError::MissingInput)?;
        input.insert("url".to_string(), Value::String(url));
        let parameters = input
            .entry("parameters")
            .or_insert_with(|| Value::Object(Map::new()));
        if !parameters.is_object() {
            *parameters = Value::Object(Map::new());
        }
        if let Some(parameters) = parameters.as_object_mut() {
            parameters.insert("descriptor".to_string(), descriptor);
        }
        Ok(())
    }
}

/// Read a previously written descriptor. A missing, unreadable or malformed
/// file yields an empty descriptor.
pub async fn load_existing_descriptor(path: impl AsRef<Path>) -> Value {
    let path = path.as_ref();
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No existing descriptor");
            return Value::Object(Map::new());
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Couldn't load existing descriptor, creating from scratch");
            return Value::Object(Map::new());
        }
    };
    match serde_json::from_slice::<Value>(&content) {
        Ok(descriptor) if descriptor.is_object() => descriptor,
        Ok(_) | Err(_) => {
            warn!(path = %path.display(), "Couldn't parse existing descriptor, creating from scratch");
            Value::Object(Map::new())
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Descriptor to upload for `flow`, given the one already on disk.
///
/// Precedence: an existing descriptor with resources, then a non-empty
/// descriptor embedded in the flow, then one synthesised from the flow's
/// resource mapping as `data/<name>.csv` files.
pub fn descriptor_for_flow(flow: &Flow, existing: &Value) -> Value {
    let mut descriptor = match existing {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let has_resources = descriptor
        .get("resources")
        .and_then(Value::as_array)
        .is_some_and(|r| !r.is_empty());
    if has_resources {
        return Value::Object(descriptor);
    }
    if descriptor.is_empty() {
        if let Some(dataset) = flow.dataset() {
            descriptor.insert("name".to_string(), Value::String(dataset.to_owned()));
        }
    }
    if let Some(embedded) = flow.descriptor().filter(|d| !is_empty(d)) {
        return embedded.clone();
    }
    let resources = flow
        .mapped_resources()
        .into_iter()
        .map(|name| {
            serde_json::json!({
                "name": name,
                "path": format!("data/{name}.csv"),
            })
        })
        .collect();
    descriptor.insert("resources".to_string(), Value::Array(resources));
    Value::Object(descriptor)
}
