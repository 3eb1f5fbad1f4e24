use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::regions::verify_region;
use crate::resources::{AllowedMethods, CustomDomain, SecurityPolicy};
use crate::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "sitestack.toml";

/// Everything needed to synthesize the stack. Every field has a default, so an
/// empty (or absent) config file describes the standard site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// cloudformation stack name.
    pub stack_name: String,
    pub region: String,
    /// physical bucket name. Bucket names are global across all accounts.
    pub bucket_name: String,
    /// directory of pre-built static files. Relative paths are resolved
    /// against the directory of the config file.
    pub source_dir: PathBuf,
    pub default_root_object: String,
    pub minimum_protocol_version: SecurityPolicy,
    pub allowed_methods: AllowedMethods,
    /// remove objects from the bucket that are no longer in `source_dir`.
    pub prune: bool,
    /// where synthesized templates are written.
    pub output_dir: PathBuf,
    pub custom_domain: Option<CustomDomain>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            stack_name: "frontend-site".into(),
            region: "us-east-1".into(),
            bucket_name: "myapp-staging-8c2f79".into(),
            source_dir: PathBuf::from("web-build"),
            default_root_object: "index.html".into(),
            minimum_protocol_version: SecurityPolicy::default(),
            allowed_methods: AllowedMethods::default(),
            prune: true,
            output_dir: PathBuf::from("sitestack.out"),
            custom_domain: None,
        }
    }
}

/// values that take precedence over the config file, typically from the
/// command line or the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub stack_name: Option<String>,
    pub region: Option<String>,
    pub bucket_name: Option<String>,
    pub source_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl SiteConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {e}", path)))?;
        let mut config = Self::from_toml_str(&contents)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// loads `path` if given, otherwise `sitestack.toml` from the current
    /// directory if it exists, otherwise the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::from_file(default_path)
                } else {
                    tracing::debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.source_dir.is_relative() {
            self.source_dir = base.join(&self.source_dir);
        }
        if self.output_dir.is_relative() {
            self.output_dir = base.join(&self.output_dir);
        }
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides { stack_name, region, bucket_name, source_dir, output_dir } = overrides;
        if let Some(v) = stack_name {
            self.stack_name = v;
        }
        if let Some(v) = region {
            self.region = v;
        }
        if let Some(v) = bucket_name {
            self.bucket_name = v;
        }
        if let Some(v) = source_dir {
            self.source_dir = v;
        }
        if let Some(v) = output_dir {
            self.output_dir = v;
        }
    }

    /// checks that don't belong to any single resource.
    pub fn validate(&self) -> Result<()> {
        verify_region(&self.region)?;
        if !self.minimum_protocol_version.meets_baseline() {
            return Err(Error::InsecureProtocol {
                requested: self.minimum_protocol_version.to_string(),
                baseline: SecurityPolicy::BASELINE.to_string(),
            });
        }
        if self.default_root_object.is_empty() || self.default_root_object.starts_with('/') {
            return Err(Error::Config(format!(
                "default_root_object {:?} must be a non-empty object key without a leading '/'",
                self.default_root_object
            )));
        }
        if let Some(domain) = &self.custom_domain {
            domain.validate().map_err(Error::Config)?;
        }
        Ok(())
    }
}
