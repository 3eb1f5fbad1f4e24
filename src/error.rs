use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Source directory {0:?} does not exist")]
    MissingSource(PathBuf),

    #[error("Source path {0:?} is not a directory")]
    NotADirectory(PathBuf),

    #[error("Source directory {0:?} contains no files")]
    EmptySource(PathBuf),

    #[error("Invalid bucket name {name:?}\n{reason}")]
    InvalidBucketName { name: String, reason: String },

    #[error("Invalid resource name {name:?}\n{reason}")]
    InvalidResourceName { name: String, reason: String },

    #[error("Invalid stack name {name:?}\n{reason}")]
    InvalidStackName { name: String, reason: String },

    #[error("Invalid region code {region:?}\nMust be one of {valid:?}")]
    InvalidRegion { region: String, valid: &'static [&'static str] },

    #[error("Minimum protocol version {requested} is below the {baseline} baseline")]
    InsecureProtocol { requested: String, baseline: String },

    #[error("Validation failed on resource '{resource}'\n{message}")]
    Validation { resource: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize template\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse config file\n{0}")]
    Toml(#[from] toml::de::Error),

    /// an error returned by an AWS API call, surfaced as-is.
    #[error("{0}")]
    Provider(String),

    #[error("Stack {stack} failed: {reason}")]
    StackFailed { stack: String, reason: String },
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::Io(err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
