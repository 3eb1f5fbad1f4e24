//! Makes the contents of a bucket match a [`SiteAsset`].
//!
//! Every uploaded object carries the blake3 hash of its contents as user
//! metadata. Planning compares those hashes against the local asset, so only
//! new or changed files are uploaded.

use std::collections::BTreeMap;
use std::sync::Arc;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::asset::SiteAsset;
use crate::resources::BucketDeployment;
use crate::{Error, Result};

pub const CONTENT_HASH_METADATA_KEY: &str = "content-hash";
/// HeadObject requests in flight at once while listing.
pub const HEAD_CONCURRENCY: usize = 16;

/// remote object key -> content hash recorded on upload (if any).
pub type RemoteListing = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReason {
    New,
    Changed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub uploads: Vec<(String, UploadReason)>,
    pub deletes: Vec<String>,
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.deletes.is_empty()
    }
}

/// the minimal set of uploads (and deletes, when pruning) that makes the
/// remote listing match the asset.
pub fn plan(asset: &SiteAsset, remote: &RemoteListing, prune: bool) -> SyncPlan {
    let mut out = SyncPlan::default();
    for file in asset.files.iter() {
        match remote.get(&file.key) {
            None => out.uploads.push((file.key.clone(), UploadReason::New)),
            Some(Some(hash)) if *hash == file.content_hash => out.unchanged += 1,
            Some(_) => out.uploads.push((file.key.clone(), UploadReason::Changed)),
        }
    }
    if prune {
        for key in remote.keys() {
            if asset.get(key).is_none() {
                out.deletes.push(key.clone());
            }
        }
    }
    out
}

/// splits a bucket listing into keys whose stored hash must be read (those the
/// asset also has) and the rest, which can only ever be pruned.
pub fn partition_listing(asset: &SiteAsset, keys: Vec<String>) -> (Vec<String>, RemoteListing) {
    let mut inspect = vec![];
    let mut untracked = RemoteListing::new();
    for key in keys {
        if asset.get(&key).is_some() {
            inspect.push(key);
        } else {
            untracked.insert(key, None);
        }
    }
    (inspect, untracked)
}

async fn list_keys(client: &Client, bucket: &str) -> Result<Vec<String>> {
    let mut keys = vec![];
    let mut token: Option<String> = None;
    loop {
        let page = client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(token.take())
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Failed to list objects in {bucket}\n{:#?}", e)))?;
        for object in page.contents().unwrap_or_default() {
            if let Some(key) = object.key() {
                keys.push(key.to_string());
            }
        }
        match page.next_continuation_token() {
            Some(next) => token = Some(next.to_string()),
            None => break,
        }
    }
    Ok(keys)
}

async fn stored_hash(client: &Client, bucket: &str, key: &str) -> Result<Option<String>> {
    let head = client
        .head_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| Error::Provider(format!("Failed to read {key} in {bucket}\n{:#?}", e)))?;
    Ok(head
        .metadata()
        .and_then(|m| m.get(CONTENT_HASH_METADATA_KEY))
        .cloned())
}

/// every object in `bucket`, with the stored hash of those `asset` could upload.
pub async fn list_remote(client: &Client, bucket: &str, asset: &SiteAsset) -> Result<RemoteListing> {
    let keys = list_keys(client, bucket).await?;
    let (inspect, mut out) = partition_listing(asset, keys);

    let limit = Arc::new(Semaphore::new(HEAD_CONCURRENCY));
    let mut tasks = JoinSet::new();
    for key in inspect {
        let client = client.clone();
        let bucket = bucket.to_string();
        let limit = limit.clone();
        tasks.spawn(async move {
            let _permit = limit
                .acquire_owned()
                .await
                .map_err(|e| Error::Provider(format!("Failed to read {key} in {bucket}\n{e}")))?;
            let hash = stored_hash(&client, &bucket, &key).await?;
            Ok::<_, Error>((key, hash))
        });
    }
    while let Some(joined) = tasks.join_next().await {
        let (key, hash) = joined.map_err(|e| Error::Provider(format!("HeadObject task failed\n{e}")))??;
        out.insert(key, hash);
    }
    Ok(out)
}

pub async fn apply(client: &Client, deployment: &BucketDeployment, plan: &SyncPlan) -> Result<()> {
    let bucket = &deployment.bucket_name;
    for (key, reason) in plan.uploads.iter() {
        let file = deployment.asset.get(key).ok_or_else(|| {
            Error::Config(format!("Planned upload {key} is not part of the asset"))
        })?;
        let body = tokio::fs::read(&file.path).await?;
        tracing::debug!("Uploading {key} ({:?}, {} bytes)", reason, file.size);
        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(file.content_type)
            .metadata(CONTENT_HASH_METADATA_KEY, &file.content_hash)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Failed to upload {key} to {bucket}\n{:#?}", e)))?;
    }
    for key in plan.deletes.iter() {
        tracing::debug!("Deleting {key}");
        client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Failed to delete {key} from {bucket}\n{:#?}", e)))?;
    }
    Ok(())
}

/// list, plan and apply in one go. Returns the plan that was applied.
pub async fn sync(client: &Client, deployment: &BucketDeployment) -> Result<SyncPlan> {
    let remote = list_remote(client, &deployment.bucket_name, &deployment.asset).await?;
    let plan = plan(&deployment.asset, &remote, deployment.prune);
    if plan.is_empty() {
        tracing::info!("Bucket {} is up to date ({} files)", deployment.bucket_name, plan.unchanged);
        return Ok(plan);
    }
    tracing::info!(
        "Syncing {} to {}: {} uploads, {} deletes, {} unchanged",
        deployment.asset.source.display(),
        deployment.bucket_name,
        plan.uploads.len(),
        plan.deletes.len(),
        plan.unchanged,
    );
    apply(client, deployment, &plan).await?;
    Ok(plan)
}
