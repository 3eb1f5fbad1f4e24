use serde_json::{json, Value};

use crate::asset::SiteAsset;
use super::s3_bucket::SiteBucket;

/// Copies a local [`SiteAsset`] into a [`SiteBucket`].
///
/// Unlike the other declarations this is not a CloudFormation resource. It is
/// recorded in the template metadata, and carried out by the deployer once the
/// stack (and therefore the bucket) exists.
#[derive(Debug, Clone)]
pub struct BucketDeployment {
    pub asset: SiteAsset,
    pub bucket_logical_id: String,
    pub bucket_name: String,
    /// delete objects in the bucket that are not part of the asset.
    pub prune: bool,
}

impl BucketDeployment {
    pub fn new(asset: SiteAsset, bucket: &SiteBucket) -> Self {
        Self {
            asset,
            bucket_logical_id: bucket.logical_id.clone(),
            bucket_name: bucket.bucket_name.clone(),
            prune: true,
        }
    }

    pub fn metadata(&self) -> Value {
        json!({
            "Source": self.asset.source.to_string_lossy(),
            "SourceHash": self.asset.fingerprint,
            "FileCount": self.asset.files.len(),
            "TotalBytes": self.asset.total_size(),
            "DestinationBucket": self.bucket_name,
            "DestinationBucketLogicalId": self.bucket_logical_id,
            "Prune": self.prune,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_source_and_destination() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "hi").unwrap();
        let asset = SiteAsset::from_dir(dir.path()).unwrap();
        let bucket = SiteBucket::new("myapp-staging-8c2f79", "SiteBucket").unwrap();
        let deployment = BucketDeployment::new(asset.clone(), &bucket);

        assert_eq!(deployment.bucket_name, "myapp-staging-8c2f79");
        assert!(deployment.prune);

        let meta = deployment.metadata();
        assert_eq!(meta["SourceHash"], asset.fingerprint.as_str());
        assert_eq!(meta["FileCount"], 1);
        assert_eq!(meta["DestinationBucket"], "myapp-staging-8c2f79");
        assert_eq!(meta["DestinationBucketLogicalId"], "SiteBucket");
    }
}
