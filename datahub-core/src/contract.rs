//! # contract: the DataHub API surface the push pipeline talks to
//!
//! [`DataHubApi`] is the single seam between the orchestration in
//! [`crate::push`] and the network. [`crate::client::HttpDataHub`] implements
//! it over reqwest; tests use the generated `MockDataHubApi`.
//!
//! The request/response types here mirror the JSON wire format of the auth,
//! rawstore and source services.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::PushError;
use crate::options::Findability;
use crate::package::Resource;

/// Services that hand out short-lived tokens via `/auth/authorize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Rawstore,
    Source,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Rawstore => "rawstore",
            Service::Source => "source",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file entry of a rawstore authorize request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub length: u64,
    pub md5: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub owner: String,
    pub findability: Findability,
}

/// Body of `POST /rawstore/authorize`; `filedata` is keyed by resource path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawstoreAuthorizeRequest {
    pub metadata: UploadMetadata,
    pub filedata: BTreeMap<String, FileInfo>,
}

/// Upload permission for one resource, as returned by the rawstore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCredential {
    pub upload_url: String,
    /// Form fields required by the object store's POST policy, including `key`.
    #[serde(default)]
    pub upload_query: BTreeMap<String, String>,
    /// The object is already stored; no upload is needed.
    #[serde(default)]
    pub exists: bool,
}

impl UploadCredential {
    /// Durable object-store location: `upload_url` joined with the content key.
    pub fn rawstore_url(&self) -> String {
        match self.upload_query.get("key") {
            Some(key) => format!(
                "{}/{}",
                self.upload_url.trim_end_matches('/'),
                key.trim_start_matches('/')
            ),
            None => self.upload_url.clone(),
        }
    }

    pub fn content_type(&self) -> &str {
        self.upload_query
            .get("Content-Type")
            .map(String::as_str)
            .unwrap_or("application/octet-stream")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawstoreAuthorizeResponse {
    pub filedata: BTreeMap<String, UploadCredential>,
}

/// Answer of `POST /source/upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Progress of a single resource upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    /// Resource path being uploaded.
    pub file: String,
    /// Size of the resource.
    pub total_bytes: u64,
    /// Resource bytes handed to the transport so far.
    pub transferred: u64,
    pub completed: bool,
}

/// Stages of a push, in order. A push starts out `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PushStage {
    #[default]
    Idle,
    AuthorizingUpload,
    Uploading,
    AssemblingSpec,
    Submitting,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Stage(PushStage),
    Upload(UploadProgress),
}

pub type EventSender = UnboundedSender<PushEvent>;

/// Everything the push pipeline needs from the remote side.
///
/// Tokens are passed explicitly: the caller obtains them once per push with
/// [`DataHubApi::authorize`] and shares them across concurrent calls.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DataHubApi: Send + Sync {
    /// Exchange the user token for a token scoped to `service`.
    async fn authorize(&self, service: Service) -> Result<String, PushError>;

    /// Ask the rawstore for upload credentials, keyed by resource path.
    async fn rawstore_authorize(
        &self,
        token: &str,
        request: &RawstoreAuthorizeRequest,
    ) -> Result<BTreeMap<String, UploadCredential>, PushError>;

    /// Upload one resource to the object store described by `credential`.
    async fn upload(
        &self,
        credential: &UploadCredential,
        resource: &Resource,
        events: Option<EventSender>,
    ) -> Result<(), PushError>;

    /// Exchange a rawstore URL for a time-limited signed download URL.
    async fn presign(
        &self,
        token: &str,
        owner_id: &str,
        rawstore_url: &str,
    ) -> Result<String, PushError>;

    /// Submit a processing spec to the source service.
    async fn submit(
        &self,
        token: &str,
        spec: &serde_json::Value,
    ) -> Result<SubmitResponse, PushError>;

    /// Check that a remote resource URL answers successfully.
    async fn check_url(&self, url: &str) -> Result<(), PushError>;

    /// Download the content of a remote resource.
    async fn fetch(&self, url: &str) -> Result<Bytes, PushError>;
}
