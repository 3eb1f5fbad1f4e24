//! Local static assets: the directory a site is built into.
//!
//! Building a [`SiteAsset`] is the first thing that touches the filesystem, so
//! a missing source directory fails before any AWS call is made.

use std::path::{Component, Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetFile {
    /// object key, always forward-slash separated.
    pub key: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    /// hex encoded blake3 hash of the file contents.
    pub content_hash: String,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteAsset {
    pub source: PathBuf,
    /// sorted by key.
    pub files: Vec<AssetFile>,
    /// changes whenever any key or file content changes.
    pub fingerprint: String,
}

impl SiteAsset {
    pub fn from_dir<P: AsRef<Path>>(source: P) -> Result<Self> {
        let source = source.as_ref();
        if !source.exists() {
            return Err(Error::MissingSource(source.to_path_buf()));
        }
        if !source.is_dir() {
            return Err(Error::NotADirectory(source.to_path_buf()));
        }

        let mut paths = vec![];
        for entry in WalkDir::new(source).follow_links(true) {
            let entry = entry?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        if paths.is_empty() {
            return Err(Error::EmptySource(source.to_path_buf()));
        }

        let mut files = paths
            .par_iter()
            .map(|path| hash_file(source, path))
            .collect::<Result<Vec<_>>>()?;
        files.sort_by(|a, b| a.key.cmp(&b.key));
        let fingerprint = fingerprint(&files);
        tracing::debug!("Hashed {} files from {:?}, fingerprint {}", files.len(), source, fingerprint);

        Ok(Self { source: source.to_path_buf(), files, fingerprint })
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn get(&self, key: &str) -> Option<&AssetFile> {
        self.files
            .binary_search_by(|f| f.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.files[i])
    }
}

fn hash_file(source: &Path, path: &Path) -> Result<AssetFile> {
    let contents = std::fs::read(path)?;
    let relative = path.strip_prefix(source).map_err(|_| {
        Error::Config(format!("{:?} is not inside the source directory {:?}", path, source))
    })?;
    Ok(AssetFile {
        key: object_key(relative),
        path: path.to_path_buf(),
        size: contents.len() as u64,
        content_hash: blake3::hash(&contents).to_hex().to_string(),
        content_type: content_type_for(path),
    })
}

fn object_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn fingerprint(files: &[AssetFile]) -> String {
    let mut hasher = blake3::Hasher::new();
    for file in files {
        hasher.update(file.key.as_bytes());
        hasher.update(&[0]);
        hasher.update(file.content_hash.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" | "map" => "application/json",
        "webmanifest" => "application/manifest+json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}
