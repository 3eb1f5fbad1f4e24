use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cfn::{get_att, get_ref, join, policy_document, policy_statement, sub, CfnResource};

/// caching optimized:
/// https://docs.aws.amazon.com/AmazonCloudFront/latest/DeveloperGuide/using-managed-cache-policies.html#managed-cache-caching-optimized
pub const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

/// error statuses that get rewritten to the root document so that client side
/// routing can handle deep links.
pub const SPA_FALLBACK_STATUS_CODES: &[u16] = &[400, 403, 404];
pub const SPA_FALLBACK_TTL_SECONDS: u64 = 10;

const DEFAULT_ORIGIN_ID: &str = "origin1";

/// CloudFront viewer security policies, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityPolicy {
    #[serde(rename = "SSLv3")]
    SslV3,
    #[serde(rename = "TLSv1")]
    TlsV1,
    #[serde(rename = "TLSv1_2016")]
    TlsV1_2016,
    #[serde(rename = "TLSv1.1_2016")]
    TlsV1_1_2016,
    #[serde(rename = "TLSv1.2_2018")]
    TlsV1_2_2018,
    #[serde(rename = "TLSv1.2_2019")]
    TlsV1_2_2019,
    #[serde(rename = "TLSv1.2_2021")]
    TlsV1_2_2021,
}

impl SecurityPolicy {
    /// nothing older than this is ever rendered.
    pub const BASELINE: SecurityPolicy = SecurityPolicy::TlsV1_2_2019;

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityPolicy::SslV3 => "SSLv3",
            SecurityPolicy::TlsV1 => "TLSv1",
            SecurityPolicy::TlsV1_2016 => "TLSv1_2016",
            SecurityPolicy::TlsV1_1_2016 => "TLSv1.1_2016",
            SecurityPolicy::TlsV1_2_2018 => "TLSv1.2_2018",
            SecurityPolicy::TlsV1_2_2019 => "TLSv1.2_2019",
            SecurityPolicy::TlsV1_2_2021 => "TLSv1.2_2021",
        }
    }

    pub fn meets_baseline(&self) -> bool {
        *self >= Self::BASELINE
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::BASELINE
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// methods forwarded to the origin. Only read-only sets exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AllowedMethods {
    #[serde(rename = "GET_HEAD")]
    GetHead,
    #[default]
    #[serde(rename = "GET_HEAD_OPTIONS")]
    GetHeadOptions,
}

impl AllowedMethods {
    pub fn methods(&self) -> &'static [&'static str] {
        match self {
            AllowedMethods::GetHead => &["GET", "HEAD"],
            AllowedMethods::GetHeadOptions => &["GET", "HEAD", "OPTIONS"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub http_status: u16,
    pub response_http_status: u16,
    pub response_page_path: String,
    pub ttl_seconds: u64,
}

impl ErrorResponse {
    fn render(&self) -> Value {
        json!({
            "ErrorCode": self.http_status,
            "ResponseCode": self.response_http_status,
            "ResponsePagePath": self.response_page_path,
            "ErrorCachingMinTTL": self.ttl_seconds,
        })
    }
}

/// the single page application fallback table: every status in
/// [`SPA_FALLBACK_STATUS_CODES`] becomes a 200 serving `page_path`.
pub fn spa_fallback_responses(page_path: &str) -> Vec<ErrorResponse> {
    SPA_FALLBACK_STATUS_CODES
        .iter()
        .map(|code| ErrorResponse {
            http_status: *code,
            response_http_status: 200,
            response_page_path: page_path.to_string(),
            ttl_seconds: SPA_FALLBACK_TTL_SECONDS,
        })
        .collect()
}

/// optionally serve the distribution from your own domain names.
/// The certificate must be an ACM certificate in us-east-1 covering every alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomDomain {
    pub aliases: Vec<String>,
    pub acm_certificate_arn: String,
}

impl CustomDomain {
    pub fn validate(&self) -> Result<(), String> {
        if self.aliases.is_empty() {
            return Err("Custom domain settings must include at least one alias".into());
        }
        for alias in self.aliases.iter() {
            let wildcards = alias.matches('*').count();
            if wildcards > 1 {
                return Err(format!("Must only provide 1 wildcard. {alias} is invalid."));
            }
            if wildcards == 1 && !alias.starts_with("*.") {
                return Err(format!("If using a wildcard, it must be the first component of your domain, eg: \"*.something.com\". {alias} is invalid."));
            }
            if alias.ends_with('.') || !alias.contains('.') {
                return Err(format!("Alias {alias} must be a fully qualified domain name without a trailing dot"));
            }
        }
        // cloudfront only accepts certificates from us-east-1
        if !self.acm_certificate_arn.starts_with("arn:") || !self.acm_certificate_arn.contains(":acm:us-east-1:") {
            return Err(format!("Certificate {:?} must be an ACM certificate ARN in us-east-1", self.acm_certificate_arn));
        }
        Ok(())
    }
}

/// the identity CloudFront uses to read from the private bucket.
pub struct OriginAccessIdentity {
    pub comment: String,
}

impl CfnResource for OriginAccessIdentity {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::CloudFrontOriginAccessIdentity"
    }

    fn properties(&self) -> Value {
        json!({
            "CloudFrontOriginAccessIdentityConfig": { "Comment": self.comment }
        })
    }
}

/// grants the origin access identity read access to every object.
/// This is the only grant on the bucket; public access stays blocked.
pub struct OriginReadPolicy {
    pub bucket_logical_id: String,
    pub oai_logical_id: String,
}

impl CfnResource for OriginReadPolicy {
    fn type_string(&self) -> &'static str {
        "AWS::S3::BucketPolicy"
    }

    fn properties(&self) -> Value {
        let objects = sub(&format!("arn:${{AWS::Partition}}:s3:::${{{}}}/*", self.bucket_logical_id));
        let principal = json!({ "CanonicalUser": get_att(&self.oai_logical_id, "S3CanonicalUserId") });
        json!({
            "Bucket": get_ref(&self.bucket_logical_id),
            "PolicyDocument": policy_document(vec![
                policy_statement(&["s3:GetObject"], objects, Some(principal)),
            ]),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SiteDistribution {
    pub comment: String,
    pub bucket_logical_id: String,
    pub oai_logical_id: String,
    pub default_root_object: String,
    pub allowed_methods: AllowedMethods,
    pub minimum_protocol_version: SecurityPolicy,
    pub error_responses: Vec<ErrorResponse>,
    pub custom_domain: Option<CustomDomain>,
}

impl SiteDistribution {
    pub fn new(bucket_logical_id: &str, oai_logical_id: &str, default_root_object: &str) -> Self {
        Self {
            comment: String::new(),
            bucket_logical_id: bucket_logical_id.to_string(),
            oai_logical_id: oai_logical_id.to_string(),
            default_root_object: default_root_object.to_string(),
            allowed_methods: AllowedMethods::default(),
            minimum_protocol_version: SecurityPolicy::default(),
            error_responses: spa_fallback_responses(&format!("/{default_root_object}")),
            custom_domain: None,
        }
    }

    fn viewer_certificate(&self) -> Value {
        let min = self.minimum_protocol_version.as_str();
        match &self.custom_domain {
            Some(domain) => json!({
                "AcmCertificateArn": domain.acm_certificate_arn,
                "SslSupportMethod": "sni-only",
                "MinimumProtocolVersion": min,
            }),
            None => json!({
                "CloudFrontDefaultCertificate": true,
                "MinimumProtocolVersion": min,
            }),
        }
    }
}

impl CfnResource for SiteDistribution {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::Distribution"
    }

    fn properties(&self) -> Value {
        let origin_access = join("", vec![
            json!("origin-access-identity/cloudfront/"),
            get_ref(&self.oai_logical_id),
        ]);
        let mut config = json!({
            "Enabled": true,
            "HttpVersion": "http2",
            "IPV6Enabled": true,
            "DefaultRootObject": self.default_root_object,
            "Origins": [{
                "Id": DEFAULT_ORIGIN_ID,
                "DomainName": get_att(&self.bucket_logical_id, "RegionalDomainName"),
                "S3OriginConfig": { "OriginAccessIdentity": origin_access },
            }],
            "DefaultCacheBehavior": {
                "TargetOriginId": DEFAULT_ORIGIN_ID,
                "ViewerProtocolPolicy": "redirect-to-https",
                "AllowedMethods": self.allowed_methods.methods(),
                "CachedMethods": ["GET", "HEAD"],
                "Compress": true,
                "CachePolicyId": CACHING_OPTIMIZED_POLICY_ID,
            },
            "CustomErrorResponses": self.error_responses.iter().map(ErrorResponse::render).collect::<Vec<_>>(),
            "ViewerCertificate": self.viewer_certificate(),
        });
        if !self.comment.is_empty() {
            config["Comment"] = json!(self.comment);
        }
        if let Some(domain) = &self.custom_domain {
            config["Aliases"] = json!(domain.aliases);
        }
        json!({ "DistributionConfig": config })
    }

    fn validate(&self) -> Result<(), String> {
        if !self.minimum_protocol_version.meets_baseline() {
            return Err(format!(
                "Minimum protocol version {} is below the {} baseline",
                self.minimum_protocol_version, SecurityPolicy::BASELINE
            ));
        }
        if self.default_root_object.is_empty() || self.default_root_object.starts_with('/') {
            return Err(format!("Invalid default root object {:?}. Must be a non-empty object key without a leading '/'", self.default_root_object));
        }
        for response in self.error_responses.iter() {
            if !(400..=599).contains(&response.http_status) {
                return Err(format!("Cannot customize response for non-error status {}", response.http_status));
            }
            if !response.response_page_path.starts_with('/') {
                return Err(format!("Response page path {:?} must begin with '/'", response.response_page_path));
            }
        }
        if let Some(domain) = &self.custom_domain {
            domain.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MUTATING_METHODS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];

    fn distribution() -> SiteDistribution {
        SiteDistribution::new("SiteBucket", "SiteOriginAccessIdentity", "index.html")
    }

    #[test]
    fn allowed_methods_are_read_only() {
        for allowed in [AllowedMethods::GetHead, AllowedMethods::GetHeadOptions] {
            let mut d = distribution();
            d.allowed_methods = allowed;
            let props = d.properties();
            let methods = props["DistributionConfig"]["DefaultCacheBehavior"]["AllowedMethods"].as_array().unwrap();
            for m in methods {
                assert!(!MUTATING_METHODS.contains(&m.as_str().unwrap()), "{m} is a mutating method");
            }
        }
    }

    #[test]
    fn fixed_behavior_policy() {
        let props = distribution().properties();
        let config = &props["DistributionConfig"];
        let behavior = &config["DefaultCacheBehavior"];
        assert_eq!(behavior["ViewerProtocolPolicy"], "redirect-to-https");
        assert_eq!(behavior["Compress"], true);
        assert_eq!(behavior["AllowedMethods"], json!(["GET", "HEAD", "OPTIONS"]));
        assert_eq!(config["DefaultRootObject"], "index.html");
        assert_eq!(config["Origins"][0]["DomainName"], json!({ "Fn::GetAtt": ["SiteBucket", "RegionalDomainName"] }));
        assert_eq!(config["ViewerCertificate"]["CloudFrontDefaultCertificate"], true);
        assert!(config.get("Aliases").is_none());
    }

    #[test]
    fn rewrites_exactly_the_spa_error_codes() {
        let props = distribution().properties();
        let responses = props["DistributionConfig"]["CustomErrorResponses"].as_array().unwrap();
        let mut codes: Vec<u64> = responses.iter().map(|r| r["ErrorCode"].as_u64().unwrap()).collect();
        codes.sort();
        assert_eq!(codes, vec![400, 403, 404]);
        for r in responses {
            assert_eq!(r["ResponseCode"], 200);
            assert_eq!(r["ResponsePagePath"], "/index.html");
            assert_eq!(r["ErrorCachingMinTTL"], 10);
        }
    }

    #[test]
    fn minimum_protocol_never_below_baseline() {
        assert!(SecurityPolicy::TlsV1_2_2021 > SecurityPolicy::BASELINE);
        assert!(!SecurityPolicy::TlsV1_1_2016.meets_baseline());

        let props = distribution().properties();
        assert_eq!(props["DistributionConfig"]["ViewerCertificate"]["MinimumProtocolVersion"], "TLSv1.2_2019");

        let mut weak = distribution();
        weak.minimum_protocol_version = SecurityPolicy::TlsV1;
        assert!(weak.validate().unwrap_err().contains("below the TLSv1.2_2019 baseline"));

        let mut strong = distribution();
        strong.minimum_protocol_version = SecurityPolicy::TlsV1_2_2021;
        assert!(strong.validate().is_ok());
    }

    #[test]
    fn security_policy_names_round_trip_through_config() {
        let parsed: SecurityPolicy = serde_json::from_str("\"TLSv1.2_2021\"").unwrap();
        assert_eq!(parsed, SecurityPolicy::TlsV1_2_2021);
        assert_eq!(parsed.to_string(), "TLSv1.2_2021");
    }

    #[test]
    fn custom_domain_uses_sni_certificate() {
        let mut d = distribution();
        d.custom_domain = Some(CustomDomain {
            aliases: vec!["www.example.com".into()],
            acm_certificate_arn: "arn:aws:acm:us-east-1:123456789012:certificate/abc".into(),
        });
        assert!(d.validate().is_ok());
        let props = d.properties();
        let config = &props["DistributionConfig"];
        assert_eq!(config["Aliases"], json!(["www.example.com"]));
        assert_eq!(config["ViewerCertificate"]["SslSupportMethod"], "sni-only");
        assert_eq!(config["ViewerCertificate"]["MinimumProtocolVersion"], "TLSv1.2_2019");
        assert!(config["ViewerCertificate"].get("CloudFrontDefaultCertificate").is_none());
    }

    #[test]
    fn custom_domain_validation() {
        let arn = "arn:aws:acm:us-east-1:123456789012:certificate/abc".to_string();
        let bad = |aliases: &[&str], arn: &str| CustomDomain {
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            acm_certificate_arn: arn.to_string(),
        }.validate();
        assert!(bad(&[], &arn).is_err());
        assert!(bad(&["*.*.example.com"], &arn).unwrap_err().contains("Must only provide 1 wildcard"));
        assert!(bad(&["www.*.example.com"], &arn).unwrap_err().contains("must be the first component"));
        assert!(bad(&["example.com."], &arn).is_err());
        assert!(bad(&["*.example.com"], &arn).is_ok());
        assert!(bad(&["example.com"], "arn:aws:acm:eu-west-1:123456789012:certificate/abc").unwrap_err().contains("us-east-1"));
    }

    #[test]
    fn origin_policy_grants_read_to_identity_only() {
        let policy = OriginReadPolicy {
            bucket_logical_id: "SiteBucket".into(),
            oai_logical_id: "SiteOriginAccessIdentity".into(),
        };
        let props = policy.properties();
        let statements = props["PolicyDocument"]["Statement"].as_array().unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0]["Action"], json!(["s3:GetObject"]));
        assert_eq!(
            statements[0]["Principal"]["CanonicalUser"],
            json!({ "Fn::GetAtt": ["SiteOriginAccessIdentity", "S3CanonicalUserId"] })
        );
        assert_eq!(statements[0]["Resource"], json!({ "Fn::Sub": "arn:${AWS::Partition}:s3:::${SiteBucket}/*" }));
    }
}
