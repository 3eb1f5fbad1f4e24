pub mod s3_bucket;
pub use s3_bucket::*;
pub mod bucket_deployment;
pub use bucket_deployment::*;
pub mod cloudfront;
pub use cloudfront::*;
