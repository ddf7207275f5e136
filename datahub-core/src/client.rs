//! reqwest-backed [`DataHubApi`].
//!
//! - Construct [`HttpDataHub`] from a [`Config`] (API URL and the user's
//!   long-lived token).
//! - API calls go through [`Agent`] with an `Auth-Token` header; uploads go
//!   straight to the object store named in each credential.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::agent::Agent;
use crate::config::Config;
use crate::contract::{
    DataHubApi, EventSender, PushEvent, RawstoreAuthorizeRequest, RawstoreAuthorizeResponse,
    Service, SubmitResponse, UploadCredential, UploadProgress,
};
use crate::error::{PushError, ResponseError};
use crate::package::Resource;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct PresignResponse {
    url: String,
}

pub struct HttpDataHub {
    agent: Agent,
    token: String,
}

impl HttpDataHub {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, PushError> {
        Ok(HttpDataHub {
            agent: Agent::new(api_url)?,
            token: token.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, PushError> {
        info!(api_url = %config.api_url, "Initialised DataHub client");
        HttpDataHub::new(config.api_url.clone(), config.token.clone())
    }
}

fn status_text(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("").to_string()
}

/// Turn a non-200 API answer into a [`ResponseError`]. Only 4xx bodies are read.
async fn response_error(response: Response) -> PushError {
    let status = response.status();
    let body = if status.is_client_error() {
        response.text().await.ok()
    } else {
        None
    };
    let err = ResponseError::new(status.as_u16(), status_text(status), body.as_deref());
    error!(status = err.status, user_error = err.user_error, message = ?err.message, "API responded with an error");
    PushError::Response(err)
}

#[async_trait]
impl DataHubApi for HttpDataHub {
    async fn authorize(&self, service: Service) -> Result<String, PushError> {
        debug!(%service, "Getting authz token");
        let response = self
            .agent
            .get("/auth/authorize", &self.token)
            .query(&[("service", service.as_str())])
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            error!(%service, status = status.as_u16(), "Authorization failed");
            return Err(PushError::Authorization {
                status: status.as_u16(),
                status_text: status_text(status),
            });
        }
        let body: TokenResponse = response.json().await?;
        info!(%service, "Authorized for service");
        Ok(body.token)
    }

    async fn rawstore_authorize(
        &self,
        token: &str,
        request: &RawstoreAuthorizeRequest,
    ) -> Result<BTreeMap<String, UploadCredential>, PushError> {
        debug!(body = %serde_json::to_string(request)?, "Calling rawstore authorize");
        let response = self
            .agent
            .post_json("/rawstore/authorize", token, request)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(response_error(response).await);
        }
        let body: RawstoreAuthorizeResponse = response.json().await?;
        info!(files = body.filedata.len(), "Received rawstore upload credentials");
        Ok(body.filedata)
    }

    async fn upload(
        &self,
        credential: &UploadCredential,
        resource: &Resource,
        events: Option<EventSender>,
    ) -> Result<(), PushError> {
        let path = resource.path().to_string();
        let total_bytes = resource.size();
        if total_bytes == 0 {
            return Err(PushError::EmptyResource { path });
        }

        let mut transferred = 0u64;
        let progress_events = events.clone();
        let progress_path = path.clone();
        let file = resource.stream().await?.inspect_ok(move |chunk| {
            transferred += chunk.len() as u64;
            if let Some(tx) = &progress_events {
                let _ = tx.send(PushEvent::Upload(UploadProgress {
                    file: progress_path.clone(),
                    total_bytes,
                    transferred,
                    completed: false,
                }));
            }
        });

        // Every part has a known length, so the body goes out with an exact
        // Content-Length. The store rejects chunked uploads.
        let file_part = Part::stream_with_length(Body::wrap_stream(file), total_bytes)
            .file_name(resource.file_name().to_owned())
            .mime_str(credential.content_type())?;
        let form = credential
            .upload_query
            .iter()
            .fold(Form::new(), |form, (name, value)| {
                form.text(name.clone(), value.clone())
            })
            .part("file", file_part);

        info!(path = %path, total_bytes, url = %credential.upload_url, "Uploading resource to rawstore");
        let response = self
            .agent
            .client()
            .post(&credential.upload_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() > 204 {
            let body = response.text().await.unwrap_or_default();
            error!(path = %path, status = status.as_u16(), body = %body, "Rawstore upload failed");
            return Err(PushError::Upload {
                path,
                status: status.as_u16(),
                body,
            });
        }

        if let Some(tx) = &events {
            let _ = tx.send(PushEvent::Upload(UploadProgress {
                file: path.clone(),
                total_bytes,
                transferred: total_bytes,
                completed: true,
            }));
        }
        info!(path = %path, status = status.as_u16(), "Uploaded resource");
        Ok(())
    }

    async fn presign(
        &self,
        token: &str,
        owner_id: &str,
        rawstore_url: &str,
    ) -> Result<String, PushError> {
        let response = self
            .agent
            .get("/rawstore/presign", token)
            .query(&[("ownerid", owner_id), ("url", rawstore_url)])
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(response_error(response).await);
        }
        let body: PresignResponse = response.json().await?;
        debug!(rawstore_url, signed_url = %body.url, "Presigned rawstore URL");
        Ok(body.url)
    }

    async fn submit(
        &self,
        token: &str,
        spec: &serde_json::Value,
    ) -> Result<SubmitResponse, PushError> {
        debug!(spec = %spec, "Calling source upload with spec");
        let response = self
            .agent
            .post_json("/source/upload", token, spec)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(response_error(response).await);
        }
        let out: SubmitResponse = response.json().await?;
        if !out.success {
            error!(errors = ?out.errors, "Source upload rejected the processing spec");
            return Err(PushError::SubmissionRejected { errors: out.errors });
        }
        info!(id = ?out.id, "Source spec submitted");
        Ok(out)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, PushError> {
        debug!(url, "Fetching remote resource");
        let response = self.agent.client().get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            error!(url, status = status.as_u16(), "Remote resource fetch failed");
            return Err(PushError::RemoteResourceUnreachable {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: format!("status {} {}", status.as_u16(), status_text(status)),
            });
        }
        Ok(response.bytes().await?)
    }

    async fn check_url(&self, url: &str) -> Result<(), PushError> {
        let unreachable = |status: Option<u16>, reason: String| PushError::RemoteResourceUnreachable {
            url: url.to_string(),
            status,
            reason,
        };
        match self.agent.client().head(url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url, "Remote resource is reachable");
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                error!(url, status = status.as_u16(), "Remote resource check failed");
                Err(unreachable(
                    Some(status.as_u16()),
                    format!("status {} {}", status.as_u16(), status_text(status)),
                ))
            }
            Err(e) => {
                error!(url, error = %e, "Remote resource check failed");
                Err(unreachable(None, e.to_string()))
            }
        }
    }
}
