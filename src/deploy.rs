//! Drives CloudFormation and S3 for a synthesized [`StaticSiteStack`].

use std::collections::BTreeMap;
use std::time::Duration;

use aws_sdk_cloudformation::config::Region;
use aws_sdk_cloudformation::types::{Capability, OnFailure, Stack, StackStatus};

use crate::stack::StaticSiteStack;
use crate::sync::{self, RemoteListing, SyncPlan};
use crate::{Error, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(700);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Complete,
    InProgress,
    Failed,
}

/// A rollback that finished is still a failed deployment.
pub fn classify(status: &StackStatus) -> StackState {
    match status {
        StackStatus::CreateComplete |
        StackStatus::UpdateComplete |
        StackStatus::DeleteComplete |
        StackStatus::ImportComplete => StackState::Complete,

        StackStatus::CreateInProgress |
        StackStatus::DeleteInProgress |
        StackStatus::ImportInProgress |
        StackStatus::ImportRollbackInProgress |
        StackStatus::ReviewInProgress |
        StackStatus::RollbackInProgress |
        StackStatus::UpdateCompleteCleanupInProgress |
        StackStatus::UpdateInProgress |
        StackStatus::UpdateRollbackCompleteCleanupInProgress |
        StackStatus::UpdateRollbackInProgress => StackState::InProgress,

        _ => StackState::Failed,
    }
}

/// the state of a stack CloudFormation declined to update because the
/// template did not change. A rolled back update left the previous template
/// in place, and that template is the one being deployed, so the stack is
/// usable as it is.
pub fn classify_unchanged(status: &StackStatus) -> StackState {
    match status {
        StackStatus::UpdateRollbackComplete |
        StackStatus::ImportRollbackComplete => StackState::Complete,
        other => classify(other),
    }
}

/// progress of a stack being deleted. `None` means it no longer exists.
pub fn classify_deleting(status: Option<&StackStatus>) -> StackState {
    match status {
        None | Some(StackStatus::DeleteComplete) => StackState::Complete,
        Some(StackStatus::DeleteInProgress) => StackState::InProgress,
        Some(_) => StackState::Failed,
    }
}

pub fn stack_outputs(stack: &Stack) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for output in stack.outputs().unwrap_or_default() {
        if let (Some(key), Some(val)) = (output.output_key(), output.output_value()) {
            out.insert(key.to_string(), val.to_string());
        }
    }
    out
}

fn stack_failed(name: &str, stack: &Stack) -> Error {
    Error::StackFailed {
        stack: name.to_string(),
        reason: format!(
            "{}: {}",
            stack.stack_status().map(|s| s.as_str()).unwrap_or("UNKNOWN"),
            stack.stack_status_reason().unwrap_or("Failed to get stack failure reason"),
        ),
    }
}

fn is_missing_stack(e_str: &str) -> bool {
    e_str.contains("does not exist")
}

/// What a successful deploy produced.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub url: String,
    pub outputs: BTreeMap<String, String>,
    pub sync: SyncPlan,
}

pub struct Deployer {
    cfn: aws_sdk_cloudformation::Client,
    s3: aws_sdk_s3::Client,
    pub poll_interval: Duration,
}

impl Deployer {
    pub fn new(cfn: aws_sdk_cloudformation::Client, s3: aws_sdk_s3::Client) -> Self {
        Self { cfn, s3, poll_interval: DEFAULT_POLL_INTERVAL }
    }

    /// clients for `region` using the default credential chain.
    pub async fn from_region(region: &str) -> Self {
        let shared_config = aws_config::from_env()
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self::new(
            aws_sdk_cloudformation::Client::new(&shared_config),
            aws_sdk_s3::Client::new(&shared_config),
        )
    }

    pub async fn does_stack_exist(&self, name: &str) -> Result<bool> {
        Ok(self.describe_stack(name).await?.is_some())
    }

    /// the current description of `name`, or `None` if it does not exist.
    pub async fn describe_stack(&self, name: &str) -> Result<Option<Stack>> {
        match self.cfn.describe_stacks().stack_name(name).send().await {
            Ok(d) => Ok(d.stacks().and_then(|s| s.first()).cloned()),
            Err(e) => {
                let e_str = format!("{:#?}", e);
                if is_missing_stack(&e_str) {
                    return Ok(None);
                }
                Err(Error::Provider(e_str))
            }
        }
    }

    async fn require_stack(&self, name: &str) -> Result<Stack> {
        self.describe_stack(name).await?.ok_or_else(|| Error::StackFailed {
            stack: name.to_string(),
            reason: "Stack no longer exists".to_string(),
        })
    }

    /// polls until the stack reaches a terminal state and returns its outputs.
    pub async fn wait_for_output(&self, name: &str) -> Result<BTreeMap<String, String>> {
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let stack = self.require_stack(name).await?;
            let state = stack.stack_status().map(classify).unwrap_or(StackState::Failed);
            match state {
                StackState::InProgress => {
                    tracing::debug!("Stack {name} is {}", stack.stack_status().map(|s| s.as_str()).unwrap_or_default());
                }
                StackState::Failed => return Err(stack_failed(name, &stack)),
                StackState::Complete => return Ok(stack_outputs(&stack)),
            }
        }
    }

    /// outputs of a stack whose template is already current.
    async fn unchanged_outputs(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let stack = self.require_stack(name).await?;
        match stack.stack_status().map(classify_unchanged).unwrap_or(StackState::Failed) {
            StackState::Complete => Ok(stack_outputs(&stack)),
            StackState::InProgress => self.wait_for_output(name).await,
            StackState::Failed => Err(stack_failed(name, &stack)),
        }
    }

    /// returns false when CloudFormation had nothing to change.
    pub async fn create_or_update_stack(&self, name: &str, body: &str) -> Result<bool> {
        if self.does_stack_exist(name).await? {
            tracing::info!("Updating {name} ...");
            let res = self
                .cfn
                .update_stack()
                .capabilities(Capability::CapabilityNamedIam)
                .capabilities(Capability::CapabilityIam)
                .stack_name(name)
                .template_body(body)
                .send()
                .await;
            if let Err(e) = res {
                let e_str = format!("{:#?}", e);
                if e_str.contains("No updates are to be performed") {
                    tracing::info!("Stack {name} is already up to date");
                    return Ok(false);
                }
                return Err(Error::Provider(e_str));
            }
        } else {
            tracing::info!("Creating {name} ...");
            self.cfn
                .create_stack()
                .on_failure(OnFailure::Delete)
                .capabilities(Capability::CapabilityNamedIam)
                .capabilities(Capability::CapabilityIam)
                .stack_name(name)
                .template_body(body)
                .send()
                .await
                .map_err(|e| Error::Provider(format!("{:#?}", e)))?;
        }
        Ok(true)
    }

    /// creates or updates the stack, uploads the site and returns the endpoint URL.
    /// The upload runs even when the stack itself had nothing to change.
    pub async fn deploy(&self, stack: &StaticSiteStack) -> Result<DeployReport> {
        let body = stack.template()?.to_json_pretty()?;
        let outputs = if self.create_or_update_stack(&stack.name, &body).await? {
            self.wait_for_output(&stack.name).await?
        } else {
            self.unchanged_outputs(&stack.name).await?
        };
        let url = stack
            .endpoint
            .find_in(&outputs)
            .ok_or_else(|| Error::StackFailed {
                stack: stack.name.clone(),
                reason: format!("Missing output {}", stack.endpoint.key),
            })?
            .to_string();

        let plan = sync::sync(&self.s3, &stack.deployment).await?;
        tracing::info!("{} is live at {url}", stack.name);
        Ok(DeployReport { url, outputs, sync: plan })
    }

    /// the sync a deploy would perform right now. A bucket that does not
    /// exist yet counts as empty.
    pub async fn diff(&self, stack: &StaticSiteStack) -> Result<SyncPlan> {
        let bucket = &stack.deployment.bucket_name;
        let asset = &stack.deployment.asset;
        let remote = match sync::list_remote(&self.s3, bucket, asset).await {
            Ok(remote) => remote,
            Err(Error::Provider(e)) if e.contains("NoSuchBucket") => {
                tracing::warn!("Bucket {bucket} does not exist yet");
                RemoteListing::new()
            }
            Err(e) => return Err(e),
        };
        Ok(sync::plan(asset, &remote, stack.deployment.prune))
    }

    /// deletes the stack and waits until it is gone. The bucket is emptied by
    /// its cleanup resource before CloudFormation deletes it.
    pub async fn destroy(&self, name: &str) -> Result<()> {
        if !self.does_stack_exist(name).await? {
            tracing::warn!("Stack {name} does not exist, nothing to destroy");
            return Ok(());
        }
        tracing::info!("Deleting {name} ...");
        self.cfn
            .delete_stack()
            .stack_name(name)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("{:#?}", e)))?;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let stack = self.describe_stack(name).await?;
            match classify_deleting(stack.as_ref().and_then(|s| s.stack_status())) {
                StackState::Complete => break,
                StackState::InProgress => tracing::debug!("Stack {name} is DELETE_IN_PROGRESS"),
                StackState::Failed => {
                    let Some(stack) = stack else { break };
                    return Err(stack_failed(name, &stack));
                }
            }
        }
        tracing::info!("Deleted {name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_cloudformation::types::Output;

    #[test]
    fn finished_rollbacks_are_failures() {
        assert_eq!(classify(&StackStatus::RollbackComplete), StackState::Failed);
        assert_eq!(classify(&StackStatus::UpdateRollbackComplete), StackState::Failed);
        assert_eq!(classify(&StackStatus::CreateFailed), StackState::Failed);
    }

    #[test]
    fn unchanged_template_accepts_rolled_back_update() {
        // a reverted template matches the one the rollback restored
        assert_eq!(classify_unchanged(&StackStatus::UpdateRollbackComplete), StackState::Complete);
        assert_eq!(classify_unchanged(&StackStatus::UpdateComplete), StackState::Complete);
        assert_eq!(classify_unchanged(&StackStatus::CreateComplete), StackState::Complete);
        assert_eq!(classify_unchanged(&StackStatus::UpdateInProgress), StackState::InProgress);
        // a failed create never produced a usable stack
        assert_eq!(classify_unchanged(&StackStatus::RollbackComplete), StackState::Failed);
        assert_eq!(classify_unchanged(&StackStatus::UpdateRollbackFailed), StackState::Failed);
    }

    #[test]
    fn classifies_progress_and_completion() {
        assert_eq!(classify(&StackStatus::CreateComplete), StackState::Complete);
        assert_eq!(classify(&StackStatus::UpdateComplete), StackState::Complete);
        assert_eq!(classify(&StackStatus::CreateInProgress), StackState::InProgress);
        assert_eq!(classify(&StackStatus::UpdateCompleteCleanupInProgress), StackState::InProgress);
        assert_eq!(classify(&StackStatus::from("SOMETHING_NEW")), StackState::Failed);
    }

    #[test]
    fn delete_loop_states() {
        assert_eq!(classify_deleting(None), StackState::Complete);
        assert_eq!(classify_deleting(Some(&StackStatus::DeleteComplete)), StackState::Complete);
        assert_eq!(classify_deleting(Some(&StackStatus::DeleteInProgress)), StackState::InProgress);
        assert_eq!(classify_deleting(Some(&StackStatus::DeleteFailed)), StackState::Failed);
        assert_eq!(classify_deleting(Some(&StackStatus::UpdateComplete)), StackState::Failed);
    }

    #[test]
    fn reads_complete_outputs_only() {
        let stack = Stack::builder()
            .stack_status(StackStatus::UpdateRollbackComplete)
            .outputs(Output::builder().output_key("CfnOutCloudFrontUrl").output_value("https://d1.cloudfront.net").build())
            .outputs(Output::builder().output_key("Dangling").build())
            .build();
        let outputs = stack_outputs(&stack);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["CfnOutCloudFrontUrl"], "https://d1.cloudfront.net");
    }

    #[test]
    fn failure_reason_names_the_status() {
        let stack = Stack::builder()
            .stack_status(StackStatus::RollbackComplete)
            .stack_status_reason("Resource creation cancelled")
            .build();
        let err = stack_failed("frontend-site", &stack).to_string();
        assert!(err.contains("frontend-site"));
        assert!(err.contains("ROLLBACK_COMPLETE: Resource creation cancelled"));
    }

    #[test]
    fn recognizes_missing_stack_errors() {
        assert!(is_missing_stack("ValidationError: Stack with id frontend-site does not exist"));
        assert!(!is_missing_stack("Throttling: Rate exceeded"));
    }
}
