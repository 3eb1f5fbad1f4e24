//! A minimal, typed view of a CloudFormation template.
//!
//! Every resource the stack declares implements [`CfnResource`]. Resources are
//! collected as [`Resource`] values (logical id + boxed properties) and then
//! validated and rendered into a [`Template`], which serializes with the
//! exact key casing CloudFormation expects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{Error, Result};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";
pub const POLICY_VERSION: &str = "2012-10-17";

/// What CloudFormation does with the physical resource when it is removed
/// from the stack, or when the stack is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalPolicy {
    Delete,
}

pub trait CfnResource {
    /// eg: `AWS::S3::Bucket`
    fn type_string(&self) -> &'static str;

    fn properties(&self) -> Value;

    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// logical ids this resource must be created after.
    fn depends_on(&self) -> Vec<String> {
        vec![]
    }

    /// applied as both the DeletionPolicy and the UpdateReplacePolicy.
    fn removal_policy(&self) -> Option<RemovalPolicy> {
        None
    }
}

pub struct Resource {
    pub name: String,
    pub properties: Box<dyn CfnResource>,
}

impl Resource {
    pub fn new<R: CfnResource + 'static>(name: impl Into<String>, properties: R) -> Self {
        Self { name: name.into(), properties: Box::new(properties) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<RemovalPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "Metadata", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, TemplateResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, TemplateOutput>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: Default::default(),
            metadata: Default::default(),
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl Template {
    /// validates every resource and renders them into a template.
    /// Logical ids must be unique and follow the CloudFormation naming rule.
    pub fn from_resources(resources: &[Resource]) -> Result<Self> {
        let mut out = Template::default();
        for resource in resources.iter() {
            verify_resource_name(&resource.name)?;
            if let Err(message) = resource.properties.validate() {
                return Err(Error::Validation { resource: resource.name.clone(), message });
            }
            if out.resources.contains_key(&resource.name) {
                return Err(Error::Validation {
                    resource: resource.name.clone(),
                    message: "Duplicate logical id".into(),
                });
            }
            let policy = resource.properties.removal_policy();
            let rendered = TemplateResource {
                ty: resource.properties.type_string().to_string(),
                properties: resource.properties.properties(),
                depends_on: resource.properties.depends_on(),
                deletion_policy: policy,
                update_replace_policy: policy,
            };
            out.resources.insert(resource.name.clone(), rendered);
        }
        for (name, resource) in out.resources.iter() {
            if let Some(missing) = resource.depends_on.iter().find(|d| !out.resources.contains_key(*d)) {
                return Err(Error::Validation {
                    resource: name.clone(),
                    message: format!("Depends on unknown resource '{missing}'"),
                });
            }
        }
        Ok(out)
    }

    pub fn add_output(&mut self, key: &str, description: &str, value: Value) -> Result<()> {
        verify_resource_name(key)?;
        self.outputs.insert(key.to_string(), TemplateOutput {
            description: description.to_string(),
            value,
        });
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// logical ids (and output keys) must be 1-255 ASCII alphanumeric characters.
pub fn verify_resource_name(resource_name: &str) -> Result<()> {
    let reason = if resource_name.len() > 255 {
        "must be less than 255 characters"
    } else if resource_name.is_empty() {
        "Must contain at least 1 character"
    } else if !resource_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        "Must contain only alphanumeric characters [A-Za-z0-9]"
    } else {
        return Ok(());
    };
    Err(Error::InvalidResourceName { name: resource_name.to_string(), reason: reason.to_string() })
}

pub fn get_ref(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn sub(s: &str) -> Value {
    json!({ "Fn::Sub": s })
}

pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

/// a single IAM policy statement. `principal` is omitted for identity policies.
pub fn policy_statement(actions: &[&str], resource: Value, principal: Option<Value>) -> Value {
    let mut statement = serde_json::Map::new();
    statement.insert("Effect".to_string(), Value::String("Allow".to_string()));
    statement.insert("Action".to_string(), json!(actions));
    statement.insert("Resource".to_string(), resource);
    if let Some(principal) = principal {
        statement.insert("Principal".to_string(), principal);
    }
    Value::Object(statement)
}

pub fn policy_document(statements: Vec<Value>) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": statements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        depends: Vec<String>,
        fail: bool,
    }

    impl CfnResource for Dummy {
        fn type_string(&self) -> &'static str {
            "Custom::Dummy"
        }
        fn properties(&self) -> Value {
            json!({ "Key": "value" })
        }
        fn validate(&self) -> std::result::Result<(), String> {
            if self.fail { Err("nope".into()) } else { Ok(()) }
        }
        fn depends_on(&self) -> Vec<String> {
            self.depends.clone()
        }
        fn removal_policy(&self) -> Option<RemovalPolicy> {
            Some(RemovalPolicy::Delete)
        }
    }

    fn dummy(depends: &[&str]) -> Dummy {
        Dummy { depends: depends.iter().map(|s| s.to_string()).collect(), fail: false }
    }

    #[test]
    fn renders_cloudformation_casing() {
        let resources = vec![Resource::new("A", dummy(&[])), Resource::new("B", dummy(&["A"]))];
        let template = Template::from_resources(&resources).unwrap();
        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(value["Resources"]["B"]["Type"], "Custom::Dummy");
        assert_eq!(value["Resources"]["B"]["DependsOn"], json!(["A"]));
        assert_eq!(value["Resources"]["B"]["DeletionPolicy"], "Delete");
        assert_eq!(value["Resources"]["B"]["UpdateReplacePolicy"], "Delete");
        assert!(value["Resources"]["A"].get("DependsOn").is_none());
        assert!(value.get("Outputs").is_none());
    }

    #[test]
    fn rejects_bad_templates() {
        let dup = vec![Resource::new("A", dummy(&[])), Resource::new("A", dummy(&[]))];
        assert!(Template::from_resources(&dup).unwrap_err().to_string().contains("Duplicate logical id"));

        let dangling = vec![Resource::new("A", dummy(&["Nope"]))];
        assert!(Template::from_resources(&dangling).unwrap_err().to_string().contains("unknown resource 'Nope'"));

        let failing = vec![Resource::new("A", Dummy { depends: vec![], fail: true })];
        assert!(matches!(Template::from_resources(&failing), Err(Error::Validation { .. })));

        let bad_name = vec![Resource::new("my-bucket", dummy(&[]))];
        assert!(matches!(Template::from_resources(&bad_name), Err(Error::InvalidResourceName { .. })));
    }

    #[test]
    fn resource_name_rules() {
        assert!(verify_resource_name("SiteBucket1").is_ok());
        assert!(verify_resource_name("").is_err());
        assert!(verify_resource_name("has_underscore").is_err());
        assert!(verify_resource_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn intrinsics() {
        assert_eq!(get_ref("X"), json!({ "Ref": "X" }));
        assert_eq!(get_att("X", "Arn"), json!({ "Fn::GetAtt": ["X", "Arn"] }));
        assert_eq!(
            join("", vec![json!("https://"), get_att("D", "DomainName")]),
            json!({ "Fn::Join": ["", ["https://", { "Fn::GetAtt": ["D", "DomainName"] }]] })
        );
    }
}
