//! # push: sequencing a dataset push against DataHub
//!
//! [`DataHub::push`] walks a dataset through
//! `AuthorizingUpload -> Uploading -> AssemblingSpec -> Submitting -> Done`,
//! reporting each transition (and `Failed` on error) on the optional event
//! channel of [`PushControl`]. [`DataHub::push_flow`] does the same for a
//! hand-written flow file, uploading only the descriptor.
//!
//! Every network call is raced against the [`CancellationToken`] in
//! [`PushControl`]; cancelling stops the push at the next suspension point with
//! [`PushError::Cancelled`]. Objects uploaded before a failure or cancellation
//! stay in the rawstore.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;

use futures::future::{join_all, try_join_all};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::authz::AuthorizationCache;
use crate::contract::{
    DataHubApi, EventSender, FileInfo, PushEvent, PushStage, RawstoreAuthorizeRequest, Service,
    SubmitResponse, UploadCredential, UploadMetadata,
};
use crate::error::PushError;
use crate::flow::{descriptor_for_flow, load_existing_descriptor, Flow};
use crate::options::{Findability, PushOptions};
use crate::package::{Dataset, PathType, Resource, DATAPACKAGE_JSON};
use crate::processing;

/// The account a dataset is pushed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub id: String,
    pub name: String,
}

/// Cancellation and observation of a single push.
#[derive(Debug, Clone, Default)]
pub struct PushControl {
    pub cancel: CancellationToken,
    pub events: Option<EventSender>,
}

impl PushControl {
    pub fn with_events(events: EventSender) -> Self {
        PushControl {
            cancel: CancellationToken::new(),
            events: Some(events),
        }
    }

    fn stage(&self, stage: PushStage) {
        debug!(?stage, "Push stage");
        if let Some(tx) = &self.events {
            let _ = tx.send(PushEvent::Stage(stage));
        }
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, work: F) -> Result<T, PushError>
where
    F: Future<Output = Result<T, PushError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PushError::Cancelled),
        result = work => result,
    }
}

/// Request upload credentials for `resources`, keyed by resource path.
pub async fn authorize_uploads<A: DataHubApi + ?Sized>(
    api: &A,
    token: &str,
    owner: &Owner,
    resources: &[Resource],
    findability: Findability,
) -> Result<BTreeMap<String, UploadCredential>, PushError> {
    let filedata = resources
        .iter()
        .map(|res| {
            (
                res.path().to_owned(),
                FileInfo {
                    length: res.size(),
                    md5: res.hash().to_owned(),
                    name: res.name().to_owned(),
                },
            )
        })
        .collect();
    let request = RawstoreAuthorizeRequest {
        metadata: UploadMetadata {
            owner: owner.id.clone(),
            findability,
        },
        filedata,
    };
    info!(resources = resources.len(), findability = findability.as_str(), "Getting rawstore upload credentials");
    api.rawstore_authorize(token, &request).await
}

/// Upload every resource whose object is not already stored.
///
/// All resources are checked for a credential and a non-empty body before the
/// first upload starts. Uploads then run concurrently; a failing upload does
/// not stop its siblings and the first failure is returned once all settle.
pub async fn upload_all<A: DataHubApi + ?Sized>(
    api: &A,
    resources: &[Resource],
    credentials: &BTreeMap<String, UploadCredential>,
    events: Option<&EventSender>,
) -> Result<(), PushError> {
    let mut pending = Vec::new();
    for resource in resources {
        let credential =
            credentials
                .get(resource.path())
                .ok_or_else(|| PushError::MissingCredential {
                    path: resource.path().to_owned(),
                })?;
        if credential.exists {
            info!(path = resource.path(), "Already in rawstore, skipping upload");
            continue;
        }
        if resource.size() == 0 {
            error!(path = resource.path(), "Refusing to push an empty file");
            return Err(PushError::EmptyResource {
                path: resource.path().to_owned(),
            });
        }
        pending.push((resource, credential));
    }

    info!(uploads = pending.len(), skipped = resources.len() - pending.len(), "Uploading to rawstore");
    let results = join_all(
        pending
            .into_iter()
            .map(|(resource, credential)| api.upload(credential, resource, events.cloned())),
    )
    .await;
    results.into_iter().collect::<Result<Vec<()>, _>>()?;
    info!("Uploads to rawstore complete");
    Ok(())
}

/// Push client bound to one API implementation and one owner.
pub struct DataHub<A> {
    api: A,
    owner: Owner,
}

impl<A: DataHubApi> DataHub<A> {
    pub fn new(api: A, owner: Owner) -> Self {
        DataHub { api, owner }
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Upload `dataset` and submit its processing spec.
    ///
    /// Remote resources are checked for reachability and left out of the
    /// upload; a `datapackage.json` carrying the descriptor is uploaded with
    /// the local ones. The dataset is only read.
    pub async fn push(
        &self,
        dataset: &Dataset,
        options: &PushOptions,
        control: &PushControl,
    ) -> Result<SubmitResponse, PushError> {
        info!(dataset = ?dataset.name(), resources = dataset.resources().len(), "Pushing dataset");
        let result = self.run_push(dataset, options, control).await;
        self.finish(result, control)
    }

    /// Push a flow file, attaching the descriptor at `descriptor_path` (or
    /// one derived from the flow) as its data package.
    pub async fn push_flow(
        &self,
        flow_path: impl AsRef<Path>,
        descriptor_path: impl AsRef<Path>,
        control: &PushControl,
    ) -> Result<SubmitResponse, PushError> {
        let flow_path = flow_path.as_ref();
        info!(flow = %flow_path.display(), "Pushing flow");
        let result = self
            .run_push_flow(flow_path, descriptor_path.as_ref(), control)
            .await;
        self.finish(result, control)
    }

    fn finish(
        &self,
        result: Result<SubmitResponse, PushError>,
        control: &PushControl,
    ) -> Result<SubmitResponse, PushError> {
        match &result {
            Ok(response) => {
                control.stage(PushStage::Done);
                info!(id = ?response.id, "Push complete");
            }
            Err(e) => {
                control.stage(PushStage::Failed);
                error!(error = %e, retryable = e.is_retryable(), "Push failed");
            }
        }
        result
    }

    async fn run_push(
        &self,
        dataset: &Dataset,
        options: &PushOptions,
        control: &PushControl,
    ) -> Result<SubmitResponse, PushError> {
        let cancel = &control.cancel;
        control.stage(PushStage::AuthorizingUpload);

        let remote = dataset
            .resources()
            .iter()
            .filter(|res| res.path_type() == PathType::Remote)
            .map(|res| self.api.check_url(res.path()));
        cancellable(cancel, try_join_all(remote)).await?;

        let mut resources: Vec<Resource> = dataset
            .resources()
            .iter()
            .filter(|res| res.path_type() == PathType::Local)
            .cloned()
            .collect();
        resources.push(Resource::datapackage_json(dataset.descriptor())?);

        let authz = AuthorizationCache::new(&self.api);
        let rawstore_token = cancellable(cancel, authz.token(Service::Rawstore)).await?;
        let credentials = cancellable(
            cancel,
            authorize_uploads(
                &self.api,
                rawstore_token,
                &self.owner,
                &resources,
                options.findability,
            ),
        )
        .await?;
        debug!(credentials = ?credentials, "Rawstore upload credentials");

        control.stage(PushStage::Uploading);
        cancellable(
            cancel,
            upload_all(&self.api, &resources, &credentials, control.events.as_ref()),
        )
        .await?;

        control.stage(PushStage::AssemblingSpec);
        let spec = cancellable(
            cancel,
            processing::assemble(
                &self.api,
                rawstore_token,
                &self.owner,
                &credentials,
                dataset,
                options,
            ),
        )
        .await?;
        let spec = serde_json::to_value(&spec)?;

        control.stage(PushStage::Submitting);
        let source_token = cancellable(cancel, authz.token(Service::Source)).await?;
        cancellable(cancel, self.api.submit(source_token, &spec)).await
    }

    async fn run_push_flow(
        &self,
        flow_path: &Path,
        descriptor_path: &Path,
        control: &PushControl,
    ) -> Result<SubmitResponse, PushError> {
        let cancel = &control.cancel;
        let mut flow = Flow::load(flow_path).await?;
        flow.check_input()?;
        let existing = load_existing_descriptor(descriptor_path).await;
        let descriptor = descriptor_for_flow(&flow, &existing);
        let resources = vec![Resource::datapackage_json(&descriptor)?];

        control.stage(PushStage::AuthorizingUpload);
        let authz = AuthorizationCache::new(&self.api);
        let rawstore_token = cancellable(cancel, authz.token(Service::Rawstore)).await?;
        let credentials = cancellable(
            cancel,
            authorize_uploads(
                &self.api,
                rawstore_token,
                &self.owner,
                &resources,
                flow.findability(),
            ),
        )
        .await?;

        control.stage(PushStage::Uploading);
        cancellable(
            cancel,
            upload_all(&self.api, &resources, &credentials, control.events.as_ref()),
        )
        .await?;

        control.stage(PushStage::AssemblingSpec);
        let credential =
            credentials
                .get(DATAPACKAGE_JSON)
                .ok_or_else(|| PushError::MissingCredential {
                    path: DATAPACKAGE_JSON.to_string(),
                })?;
        let signed = cancellable(
            cancel,
            self.api
                .presign(rawstore_token, &self.owner.id, &credential.rawstore_url()),
        )
        .await?;
        flow.attach_descriptor(signed, descriptor)?;

        control.stage(PushStage::Submitting);
        let source_token = cancellable(cancel, authz.token(Service::Source)).await?;
        cancellable(cancel, self.api.submit(source_token, flow.document())).await
    }
}
