//! The static site stack: storage, deployment, delivery and the endpoint output,
//! declared in that order.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{json, Value};

use crate::asset::SiteAsset;
use crate::cfn::{get_att, join, Resource, Template};
use crate::config::SiteConfig;
use crate::resources::{
    BucketDeployment, OriginAccessIdentity, OriginReadPolicy, SiteBucket, SiteDistribution,
};
use crate::{Error, Result};

pub const BUCKET_LOGICAL_ID: &str = "SiteBucket";
pub const OAI_LOGICAL_ID: &str = "SiteOriginAccessIdentity";
pub const BUCKET_POLICY_LOGICAL_ID: &str = "SiteBucketPolicy";
pub const DISTRIBUTION_LOGICAL_ID: &str = "SiteDistribution";
pub const ENDPOINT_OUTPUT_KEY: &str = "CfnOutCloudFrontUrl";
pub const DEPLOYMENT_METADATA_KEY: &str = "SiteDeployment";

/// A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
/// It must start with an alphabetical character and can't be longer than 128 characters.
pub fn validate_stack_name(stack_name: &str) -> Result<()> {
    let restriction = "Must only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.";
    let err = || Err(Error::InvalidStackName { name: stack_name.to_string(), reason: restriction.to_string() });
    match stack_name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return err(),
    }
    if stack_name.len() > 128 {
        return err();
    }
    if !stack_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return err();
    }
    Ok(())
}

/// `https://` followed by the distribution's generated domain name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOutput {
    pub key: String,
    pub distribution_logical_id: String,
}

impl EndpointOutput {
    pub const SCHEME: &'static str = "https://";
    pub const DESCRIPTION: &'static str = "The CloudFront URL";

    pub fn new(distribution_logical_id: &str) -> Self {
        Self {
            key: ENDPOINT_OUTPUT_KEY.to_string(),
            distribution_logical_id: distribution_logical_id.to_string(),
        }
    }

    /// the template value, resolved by CloudFormation once the distribution exists.
    pub fn value(&self) -> Value {
        join("", vec![json!(Self::SCHEME), get_att(&self.distribution_logical_id, "DomainName")])
    }

    /// the same composition, applied to a known domain name.
    pub fn resolve(&self, domain_name: &str) -> String {
        format!("{}{}", Self::SCHEME, domain_name)
    }

    /// picks this output out of a deployed stack's outputs.
    pub fn find_in<'a>(&self, outputs: &'a BTreeMap<String, String>) -> Option<&'a str> {
        outputs.get(&self.key).map(|s| s.as_str())
    }
}

pub struct StaticSiteStack {
    pub name: String,
    pub region: String,
    pub bucket: SiteBucket,
    pub deployment: BucketDeployment,
    pub distribution: SiteDistribution,
    pub endpoint: EndpointOutput,
}

impl StaticSiteStack {
    /// builds every declaration from the config, failing on the first invalid one.
    /// The source directory is read here, so a missing directory fails before
    /// anything talks to AWS.
    pub fn synth(config: &SiteConfig) -> Result<Self> {
        config.validate()?;
        validate_stack_name(&config.stack_name)?;

        let bucket = SiteBucket::new(&config.bucket_name, BUCKET_LOGICAL_ID)?;

        let asset = SiteAsset::from_dir(&config.source_dir)?;
        let mut deployment = BucketDeployment::new(asset, &bucket);
        deployment.prune = config.prune;

        let mut distribution = SiteDistribution::new(&bucket.logical_id, OAI_LOGICAL_ID, &config.default_root_object);
        distribution.comment = format!("{} static site", config.stack_name);
        distribution.allowed_methods = config.allowed_methods;
        distribution.minimum_protocol_version = config.minimum_protocol_version;
        distribution.custom_domain = config.custom_domain.clone();

        let endpoint = EndpointOutput::new(DISTRIBUTION_LOGICAL_ID);

        tracing::info!(
            "Synthesized stack {} ({} files, {} bytes from {:?})",
            config.stack_name,
            deployment.asset.files.len(),
            deployment.asset.total_size(),
            deployment.asset.source,
        );
        Ok(Self {
            name: config.stack_name.clone(),
            region: config.region.clone(),
            bucket,
            deployment,
            distribution,
            endpoint,
        })
    }

    fn resources(&self) -> Vec<Resource> {
        let mut out = self.bucket.resources();
        out.push(Resource::new(OAI_LOGICAL_ID, OriginAccessIdentity {
            comment: format!("Identity for {}", self.name),
        }));
        out.push(Resource::new(BUCKET_POLICY_LOGICAL_ID, OriginReadPolicy {
            bucket_logical_id: self.bucket.logical_id.clone(),
            oai_logical_id: OAI_LOGICAL_ID.to_string(),
        }));
        out.push(Resource::new(DISTRIBUTION_LOGICAL_ID, self.distribution.clone()));
        out
    }

    pub fn template(&self) -> Result<Template> {
        let mut template = Template::from_resources(&self.resources())?;
        template.description = format!("Static site {} served from {}", self.name, self.bucket.bucket_name);
        template.metadata.insert(DEPLOYMENT_METADATA_KEY.to_string(), self.deployment.metadata());
        template.add_output(&self.endpoint.key, EndpointOutput::DESCRIPTION, self.endpoint.value())?;
        Ok(template)
    }

    /// writes `<output_dir>/<stack>.template.json` and returns its path.
    pub fn write_template(&self, output_dir: &std::path::Path) -> Result<PathBuf> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(format!("{}.template.json", self.name));
        std::fs::write(&path, self.template()?.to_json_pretty()?)?;
        tracing::info!("Wrote template to {:?}", path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::SecurityPolicy;

    fn site_config() -> (tempfile::TempDir, SiteConfig) {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("web-build");
        std::fs::create_dir(&build).unwrap();
        std::fs::write(build.join("index.html"), "<div id=root></div>").unwrap();
        let config = SiteConfig { source_dir: build, ..Default::default() };
        (dir, config)
    }

    fn rendered(config: &SiteConfig) -> Value {
        let stack = StaticSiteStack::synth(config).unwrap();
        serde_json::to_value(stack.template().unwrap()).unwrap()
    }

    #[test]
    fn declares_all_four_components() {
        let (_dir, config) = site_config();
        let value = rendered(&config);
        let resources = &value["Resources"];
        assert_eq!(resources["SiteBucket"]["Type"], "AWS::S3::Bucket");
        assert_eq!(resources["SiteDistribution"]["Type"], "AWS::CloudFront::Distribution");
        assert_eq!(resources["SiteOriginAccessIdentity"]["Type"], "AWS::CloudFront::CloudFrontOriginAccessIdentity");
        assert_eq!(resources["SiteBucketPolicy"]["Type"], "AWS::S3::BucketPolicy");
        assert_eq!(value["Metadata"]["SiteDeployment"]["DestinationBucket"], "myapp-staging-8c2f79");
        assert_eq!(value["Metadata"]["SiteDeployment"]["FileCount"], 1);
        assert_eq!(value["Outputs"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn bucket_is_private_and_torn_down() {
        let (_dir, config) = site_config();
        let value = rendered(&config);
        let bucket = &value["Resources"]["SiteBucket"];
        let block = &bucket["Properties"]["PublicAccessBlockConfiguration"];
        assert_eq!(block, &json!({
            "BlockPublicAcls": true,
            "BlockPublicPolicy": true,
            "IgnorePublicAcls": true,
            "RestrictPublicBuckets": true,
        }));
        assert_eq!(bucket["DeletionPolicy"], "Delete");
        assert_eq!(value["Resources"]["SiteBucketAutoEmpty"]["Properties"]["BucketName"], json!({ "Ref": "SiteBucket" }));
    }

    #[test]
    fn distribution_fronts_the_bucket() {
        let (_dir, config) = site_config();
        let value = rendered(&config);
        let dist = &value["Resources"]["SiteDistribution"]["Properties"]["DistributionConfig"];
        assert_eq!(dist["Origins"][0]["DomainName"], json!({ "Fn::GetAtt": ["SiteBucket", "RegionalDomainName"] }));
        assert_eq!(dist["DefaultCacheBehavior"]["ViewerProtocolPolicy"], "redirect-to-https");
        assert_eq!(dist["ViewerCertificate"]["MinimumProtocolVersion"], "TLSv1.2_2019");
        let codes: Vec<u64> = dist["CustomErrorResponses"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["ErrorCode"].as_u64().unwrap())
            .collect();
        assert_eq!(codes, vec![400, 403, 404]);
    }

    #[test]
    fn endpoint_output_follows_distribution_domain() {
        let (_dir, config) = site_config();
        let value = rendered(&config);
        let output = &value["Outputs"]["CfnOutCloudFrontUrl"];
        assert_eq!(output["Description"], "The CloudFront URL");
        assert_eq!(output["Value"], json!({
            "Fn::Join": ["", ["https://", { "Fn::GetAtt": ["SiteDistribution", "DomainName"] }]]
        }));

        let endpoint = EndpointOutput::new(DISTRIBUTION_LOGICAL_ID);
        assert_eq!(endpoint.resolve("d111111abcdef8.cloudfront.net"), "https://d111111abcdef8.cloudfront.net");
        assert_ne!(endpoint.resolve("d1.cloudfront.net"), endpoint.resolve("d2.cloudfront.net"));

        let mut outputs = BTreeMap::new();
        outputs.insert(ENDPOINT_OUTPUT_KEY.to_string(), "https://d1.cloudfront.net".to_string());
        assert_eq!(endpoint.find_in(&outputs), Some("https://d1.cloudfront.net"));
    }

    #[test]
    fn missing_source_fails_synthesis() {
        let (dir, mut config) = site_config();
        config.source_dir = dir.path().join("not-built-yet");
        assert!(matches!(StaticSiteStack::synth(&config), Err(Error::MissingSource(_))));
    }

    #[test]
    fn invalid_config_fails_synthesis() {
        let (_dir, config) = site_config();

        let weak = SiteConfig { minimum_protocol_version: SecurityPolicy::TlsV1_1_2016, ..config.clone() };
        assert!(matches!(StaticSiteStack::synth(&weak), Err(Error::InsecureProtocol { .. })));

        let bad_bucket = SiteConfig { bucket_name: "Not_A_Bucket".into(), ..config.clone() };
        assert!(matches!(StaticSiteStack::synth(&bad_bucket), Err(Error::InvalidBucketName { .. })));

        let bad_stack = SiteConfig { stack_name: "1-stack".into(), ..config };
        assert!(matches!(StaticSiteStack::synth(&bad_stack), Err(Error::InvalidStackName { .. })));
    }

    #[test]
    fn stack_name_rules() {
        assert!(validate_stack_name("frontend-site").is_ok());
        assert!(validate_stack_name("").is_err());
        assert!(validate_stack_name("-site").is_err());
        assert!(validate_stack_name("my_site").is_err());
        assert!(validate_stack_name(&format!("a{}", "b".repeat(128))).is_err());
    }

    #[test]
    fn writes_template_file() {
        let (dir, config) = site_config();
        let stack = StaticSiteStack::synth(&config).unwrap();
        let path = stack.write_template(&dir.path().join("out")).unwrap();
        assert_eq!(path, dir.path().join("out").join("frontend-site.template.json"));
        let parsed: Template = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed, stack.template().unwrap());
    }
}
