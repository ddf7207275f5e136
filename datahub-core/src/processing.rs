//! The processing spec submitted to `POST /source/upload`.
//!
//! A spec names a single `datapackage` input: the signed URL of the uploaded
//! `datapackage.json`, a `resource-mapping` from each uploaded resource path
//! to its signed URL, and the descriptor itself. `outputs`, `processing` and
//! `schedule` are left out of the JSON altogether when there is nothing to
//! request.

use std::collections::BTreeMap;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::contract::{DataHubApi, UploadCredential};
use crate::error::PushError;
use crate::options::{Findability, Output, PushOptions};
use crate::package::{Dataset, DATAPACKAGE_JSON};
use crate::push::Owner;
use crate::steps::{derive_steps, ProcessingStep};

pub const PROCESSING_SPEC_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub version: u32,
    pub ownerid: String,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    pub findability: Findability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputParameters {
    #[serde(rename = "resource-mapping")]
    pub resource_mapping: BTreeMap<String, String>,
    pub descriptor: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub kind: String,
    pub url: String,
    pub parameters: InputParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSpec {
    pub meta: Meta,
    pub inputs: Vec<Input>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Output>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<Vec<ProcessingStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Presign every uploaded object, derive processing steps and build the processing spec.
///
/// `token` is the rawstore token. Any failing presign fails the assembly.
pub async fn assemble<A: DataHubApi + ?Sized>(
    api: &A,
    token: &str,
    owner: &Owner,
    credentials: &BTreeMap<String, UploadCredential>,
    dataset: &Dataset,
    options: &PushOptions,
) -> Result<ProcessingSpec, PushError> {
    let descriptor_credential =
        credentials
            .get(DATAPACKAGE_JSON)
            .ok_or_else(|| PushError::MissingCredential {
                path: DATAPACKAGE_JSON.to_string(),
            })?;

    let presigns = credentials
        .iter()
        .filter(|(path, _)| path.as_str() != DATAPACKAGE_JSON)
        .map(|(path, credential)| async move {
            let signed = api
                .presign(token, &owner.id, &credential.rawstore_url())
                .await?;
            debug!(path = %path, "Presigned resource");
            Ok::<_, PushError>((path.clone(), signed))
        });
    let descriptor_rawstore_url = descriptor_credential.rawstore_url();
    let (resource_mapping, descriptor_url) = futures::try_join!(
        try_join_all(presigns),
        api.presign(token, &owner.id, &descriptor_rawstore_url),
    )?;
    let resource_mapping: BTreeMap<String, String> = resource_mapping.into_iter().collect();

    let processing = derive_steps(api, dataset.resources(), options.sheets.as_deref()).await?;

    let spec = ProcessingSpec {
        meta: Meta {
            version: PROCESSING_SPEC_VERSION,
            ownerid: owner.id.clone(),
            owner: owner.name.clone(),
            dataset: dataset.name().map(str::to_owned),
            findability: options.findability,
        },
        inputs: vec![Input {
            kind: "datapackage".to_string(),
            url: descriptor_url,
            parameters: InputParameters {
                resource_mapping,
                descriptor: dataset.descriptor().clone(),
            },
        }],
        outputs: non_empty(options.outputs.outputs()),
        processing: non_empty(processing),
        schedule: options.schedule.clone(),
    };
    info!(
        mapped = spec.inputs[0].parameters.resource_mapping.len(),
        steps = spec.processing.as_ref().map_or(0, Vec::len),
        outputs = spec.outputs.as_ref().map_or(0, Vec::len),
        "Assembled processing spec"
    );
    Ok(spec)
}
