//! Declares and deploys a static website: a private S3 bucket holding the
//! site's files, fronted by a CloudFront distribution that serves it over https.
//!
//! ```no_run
//! # async fn run() -> sitestack::Result<()> {
//! let config = sitestack::SiteConfig::load(None)?;
//! let stack = sitestack::StaticSiteStack::synth(&config)?;
//! let deployer = sitestack::Deployer::from_region(&stack.region).await;
//! let report = deployer.deploy(&stack).await?;
//! println!("{}", report.url);
//! # Ok(())
//! # }
//! ```

pub mod asset;
pub mod cfn;
pub mod config;
pub mod deploy;
pub mod error;
pub mod regions;
pub mod resources;
pub mod stack;
pub mod sync;

pub use asset::SiteAsset;
pub use cfn::Template;
pub use config::{ConfigOverrides, SiteConfig};
pub use deploy::{DeployReport, Deployer};
pub use error::{Error, Result};
pub use stack::StaticSiteStack;
pub use sync::SyncPlan;
