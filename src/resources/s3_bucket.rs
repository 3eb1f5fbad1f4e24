use serde_json::{json, Value};

use crate::cfn::{get_att, get_ref, policy_document, policy_statement, sub, CfnResource, RemovalPolicy, Resource};
use crate::{Error, Result};

pub const AUTO_DELETE_TAG: &str = "sitestack:auto-delete-objects";

/// empties the bucket when the custom resource receives a Delete request,
/// so that CloudFormation can then delete the bucket itself. Only buckets
/// carrying [`AUTO_DELETE_TAG`] are emptied, and a bucket that is already
/// gone counts as empty.
const AUTO_EMPTY_HANDLER: &str = r#"const response = require('cfn-response');
const { S3Client, GetBucketTaggingCommand, ListObjectsV2Command, DeleteObjectsCommand } = require('@aws-sdk/client-s3');
const s3 = new S3Client({});
const AUTO_DELETE_TAG = 'sitestack:auto-delete-objects';
async function isTagged(bucketName) {
    try {
        const tagging = await s3.send(new GetBucketTaggingCommand({ Bucket: bucketName }));
        return (tagging.TagSet || []).some((tag) => tag.Key === AUTO_DELETE_TAG && tag.Value === 'true');
    } catch (err) {
        if (err.name === 'NoSuchTagSet') {
            return false;
        }
        throw err;
    }
}
async function emptyBucket(bucketName) {
    if (!(await isTagged(bucketName))) {
        console.log(`${bucketName} is not tagged ${AUTO_DELETE_TAG}, leaving its objects`);
        return;
    }
    let token;
    do {
        const page = await s3.send(new ListObjectsV2Command({ Bucket: bucketName, ContinuationToken: token }));
        const objects = (page.Contents || []).map((obj) => ({ Key: obj.Key }));
        if (objects.length > 0) {
            await s3.send(new DeleteObjectsCommand({ Bucket: bucketName, Delete: { Objects: objects, Quiet: true } }));
        }
        token = page.NextContinuationToken;
    } while (token);
}
exports.handler = async function(event, context) {
    let responseType = response.SUCCESS;
    if (event.RequestType == 'Delete') {
        try {
            await emptyBucket(event.ResourceProperties.BucketName);
        } catch (err) {
            if (err.name === 'NoSuchBucket') {
                console.log(`${event.ResourceProperties.BucketName} is already gone`);
            } else {
                console.log(`Failed to empty bucket: ${err}`);
                responseType = response.FAILED;
            }
        }
    }
    await new Promise((resolve) => {
        context.done = resolve;
        response.send(event, context, responseType);
    });
};
"#;

/// S3 bucket naming rules:
/// https://docs.aws.amazon.com/AmazonS3/latest/userguide/bucketnamingrules.html
pub fn verify_bucket_name(bucket_name: &str) -> Result<()> {
    let err = |reason: &str| Err(Error::InvalidBucketName {
        name: bucket_name.to_string(),
        reason: reason.to_string(),
    });
    if bucket_name.len() > 63 || bucket_name.len() < 3 {
        return err("Must be between 3 and 63 characters");
    }
    let valid_char_check = |c: char| -> bool {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-'
    };
    if !bucket_name.chars().all(valid_char_check) {
        return err("May only contain lowercase letters, numbers, dots, and dashes");
    }
    let first_ok = bucket_name.chars().next().map_or(false, |c| c.is_ascii_alphanumeric());
    let last_ok = bucket_name.chars().last().map_or(false, |c| c.is_ascii_alphanumeric());
    if !first_ok || !last_ok {
        return err("First and last character must be either lowercase letter, or number");
    }
    if bucket_name.contains("..") {
        return err("May not contain two consecutive dots");
    }
    Ok(())
}

/// A private bucket that is destroyed along with its contents when the stack is deleted.
///
/// The public access block cannot be relaxed.
#[derive(Debug, Clone)]
pub struct SiteBucket {
    pub logical_id: String,
    pub bucket_name: String,
}

impl SiteBucket {
    pub fn new(bucket_name: &str, logical_id: &str) -> Result<Self> {
        verify_bucket_name(bucket_name)?;
        crate::cfn::verify_resource_name(logical_id)?;
        Ok(Self {
            logical_id: logical_id.to_string(),
            bucket_name: bucket_name.to_string(),
        })
    }

    pub fn auto_empty_role_id(&self) -> String {
        format!("{}AutoEmptyRole", self.logical_id)
    }

    pub fn auto_empty_function_id(&self) -> String {
        format!("{}AutoEmptyFunction", self.logical_id)
    }

    pub fn auto_empty_resource_id(&self) -> String {
        format!("{}AutoEmpty", self.logical_id)
    }

    /// the bucket plus the role, function and custom resource that empty it on teardown.
    pub fn resources(&self) -> Vec<Resource> {
        let role = AutoEmptyRole {
            bucket_logical_id: self.logical_id.clone(),
        };
        let function = AutoEmptyFunction {
            role_logical_id: self.auto_empty_role_id(),
        };
        let cleanup = AutoEmptyResource {
            function_logical_id: self.auto_empty_function_id(),
            role_logical_id: self.auto_empty_role_id(),
            bucket_logical_id: self.logical_id.clone(),
        };
        vec![
            Resource::new(self.logical_id.clone(), self.clone()),
            Resource::new(self.auto_empty_role_id(), role),
            Resource::new(self.auto_empty_function_id(), function),
            Resource::new(self.auto_empty_resource_id(), cleanup),
        ]
    }
}

impl CfnResource for SiteBucket {
    fn type_string(&self) -> &'static str {
        "AWS::S3::Bucket"
    }

    fn properties(&self) -> Value {
        json!({
            "BucketName": self.bucket_name,
            "PublicAccessBlockConfiguration": {
                "BlockPublicAcls": true,
                "BlockPublicPolicy": true,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": true,
            },
            "Tags": [{ "Key": AUTO_DELETE_TAG, "Value": "true" }],
        })
    }

    fn removal_policy(&self) -> Option<RemovalPolicy> {
        Some(RemovalPolicy::Delete)
    }
}

pub struct AutoEmptyRole {
    pub bucket_logical_id: String,
}

impl CfnResource for AutoEmptyRole {
    fn type_string(&self) -> &'static str {
        "AWS::IAM::Role"
    }

    fn properties(&self) -> Value {
        let assume = json!({
            "Effect": "Allow",
            "Principal": { "Service": "lambda.amazonaws.com" },
            "Action": "sts:AssumeRole",
        });
        let bucket_arn = get_att(&self.bucket_logical_id, "Arn");
        let objects = sub(&format!("arn:${{AWS::Partition}}:s3:::${{{}}}/*", self.bucket_logical_id));
        json!({
            "Description": format!("empties {} before it is deleted", self.bucket_logical_id),
            "AssumeRolePolicyDocument": policy_document(vec![assume]),
            "ManagedPolicyArns": [
                sub("arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"),
            ],
            "Policies": [{
                "PolicyName": "auto-empty-bucket",
                "PolicyDocument": policy_document(vec![
                    policy_statement(&["s3:GetBucketTagging", "s3:ListBucket"], bucket_arn, None),
                    policy_statement(&["s3:DeleteObject"], objects, None),
                ]),
            }],
        })
    }
}

pub struct AutoEmptyFunction {
    pub role_logical_id: String,
}

impl CfnResource for AutoEmptyFunction {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Function"
    }

    fn properties(&self) -> Value {
        json!({
            "Runtime": "nodejs20.x",
            "Handler": "index.handler",
            "Timeout": 900,
            "MemorySize": 128,
            "Role": get_att(&self.role_logical_id, "Arn"),
            "Code": { "ZipFile": AUTO_EMPTY_HANDLER },
        })
    }
}

pub struct AutoEmptyResource {
    pub function_logical_id: String,
    pub role_logical_id: String,
    pub bucket_logical_id: String,
}

impl CfnResource for AutoEmptyResource {
    fn type_string(&self) -> &'static str {
        "Custom::BucketAutoEmpty"
    }

    fn properties(&self) -> Value {
        json!({
            "ServiceToken": get_att(&self.function_logical_id, "Arn"),
            "BucketName": get_ref(&self.bucket_logical_id),
        })
    }

    // the role must outlive the delete request, not just the function
    fn depends_on(&self) -> Vec<String> {
        vec![self.role_logical_id.clone()]
    }
}
