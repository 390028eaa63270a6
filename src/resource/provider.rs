//! Resource providers.
//!
//! # Responsibilities
//! - Describe a resource: existence, directory flag, size, modification time
//! - Seek ahead to a range start
//! - Stream at most `max_bytes` of content through a [`Response`]
//!
//! # Design Decisions
//! - Providers are created per request by a [`ProviderFactory`]
//! - Paths containing `..` segments resolve to a missing resource
//! - Transfers write in fixed-size chunks, so memory use does not grow with
//!   file size

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::WriteError;
use crate::http::Response;

/// Size of each chunk handed to the response writer.
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// Failure while streaming a resource.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("write failed: {0}")]
    Write(#[from] WriteError),
}

/// A resource that can be described and streamed.
pub trait ResourceProvider: Send {
    fn exists(&self) -> bool;

    fn is_directory(&self) -> bool;

    fn last_modified(&self) -> Option<SystemTime>;

    /// Size in bytes, if known.
    fn size(&self) -> Option<u64>;

    /// Strong validator, if the provider has one.
    fn etag(&self) -> Option<String> {
        None
    }

    /// Start the next transfer at `offset`. Returns `false` if the provider
    /// cannot seek there, in which case nothing changes.
    fn skip(&mut self, offset: u64) -> bool;

    /// Stream up to `max_bytes` from the current offset. With `include_body`
    /// false nothing is written.
    fn transfer<'a>(
        &'a mut self,
        response: &'a Response,
        include_body: bool,
        max_bytes: u64,
    ) -> BoxFuture<'a, Result<(), TransferError>>;
}

/// Resolves request paths (already percent-decoded, relative to the mount)
/// to providers.
pub trait ProviderFactory: Send + Sync + 'static {
    fn get<'a>(&'a self, relative_path: &'a str) -> BoxFuture<'a, Box<dyn ResourceProvider>>;
}

/// Split a request path into safe segments, or `None` if it escapes its root.
fn safe_segments(relative_path: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in relative_path.split(&['/', '\\'][..]) {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\0') => return None,
            s => segments.push(s),
        }
    }
    Some(segments)
}

/// A provider for a path that does not exist.
struct Missing;

impl ResourceProvider for Missing {
    fn exists(&self) -> bool {
        false
    }

    fn is_directory(&self) -> bool {
        false
    }

    fn last_modified(&self) -> Option<SystemTime> {
        None
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn skip(&mut self, _offset: u64) -> bool {
        false
    }

    fn transfer<'a>(
        &'a mut self,
        _response: &'a Response,
        _include_body: bool,
        _max_bytes: u64,
    ) -> BoxFuture<'a, Result<(), TransferError>> {
        async { Ok(()) }.boxed()
    }
}

/// Serves files below a base directory.
#[derive(Debug, Clone)]
pub struct FileProviderFactory {
    base: PathBuf,
}

impl FileProviderFactory {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl ProviderFactory for FileProviderFactory {
    fn get<'a>(&'a self, relative_path: &'a str) -> BoxFuture<'a, Box<dyn ResourceProvider>> {
        async move {
            let Some(segments) = safe_segments(relative_path) else {
                tracing::debug!(path = relative_path, "Rejecting path outside the resource root");
                return Box::new(Missing) as Box<dyn ResourceProvider>;
            };
            let mut path = self.base.clone();
            path.extend(segments);

            match tokio::fs::metadata(&path).await {
                Ok(metadata) => Box::new(FileProvider {
                    path,
                    metadata,
                    offset: 0,
                }) as Box<dyn ResourceProvider>,
                Err(_) => Box::new(Missing),
            }
        }
        .boxed()
    }
}

/// A file on disk.
pub struct FileProvider {
    path: PathBuf,
    metadata: std::fs::Metadata,
    offset: u64,
}

impl ResourceProvider for FileProvider {
    fn exists(&self) -> bool {
        true
    }

    fn is_directory(&self) -> bool {
        self.metadata.is_dir()
    }

    fn last_modified(&self) -> Option<SystemTime> {
        self.metadata.modified().ok()
    }

    fn size(&self) -> Option<u64> {
        self.metadata.is_file().then(|| self.metadata.len())
    }

    fn skip(&mut self, offset: u64) -> bool {
        if !self.metadata.is_file() || offset > self.metadata.len() {
            return false;
        }
        self.offset = offset;
        true
    }

    fn transfer<'a>(
        &'a mut self,
        response: &'a Response,
        include_body: bool,
        max_bytes: u64,
    ) -> BoxFuture<'a, Result<(), TransferError>> {
        async move {
            if !include_body {
                return Ok(());
            }
            let mut file = tokio::fs::File::open(&self.path).await?;
            if self.offset > 0 {
                file.seek(std::io::SeekFrom::Start(self.offset)).await?;
            }

            let mut remaining = max_bytes;
            let mut buf = vec![0u8; TRANSFER_CHUNK_SIZE];
            while remaining > 0 {
                let want = remaining.min(buf.len() as u64) as usize;
                let read = file.read(&mut buf[..want]).await?;
                if read == 0 {
                    break;
                }
                response.write(Bytes::copy_from_slice(&buf[..read])).await?;
                remaining -= read as u64;
            }
            Ok(())
        }
        .boxed()
    }
}

/// An asset held in memory.
#[derive(Debug, Clone)]
pub struct EmbeddedAsset {
    pub content: Bytes,
    pub last_modified: Option<SystemTime>,
}

/// Serves assets compiled into or loaded by the application, keyed by path.
///
/// A path is a directory if any asset lives below it.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedProviderFactory {
    assets: Arc<HashMap<String, EmbeddedAsset>>,
}

impl EmbeddedProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asset. `path` is relative to the mount, e.g. `css/site.css`.
    pub fn with_asset(
        mut self,
        path: &str,
        content: impl Into<Bytes>,
        last_modified: Option<SystemTime>,
    ) -> Self {
        let key = normalize(path);
        Arc::make_mut(&mut self.assets).insert(
            key,
            EmbeddedAsset {
                content: content.into(),
                last_modified,
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

impl ProviderFactory for EmbeddedProviderFactory {
    fn get<'a>(&'a self, relative_path: &'a str) -> BoxFuture<'a, Box<dyn ResourceProvider>> {
        let provider: Box<dyn ResourceProvider> = match safe_segments(relative_path) {
            None => Box::new(Missing),
            Some(segments) => {
                let key = segments.join("/");
                match self.assets.get(&key) {
                    Some(asset) => Box::new(EmbeddedProvider {
                        asset: Some(asset.clone()),
                        offset: 0,
                    }),
                    None => {
                        let prefix = format!("{key}/");
                        let is_directory = key.is_empty()
                            || self.assets.keys().any(|k| k.starts_with(&prefix));
                        if is_directory {
                            Box::new(EmbeddedProvider {
                                asset: None,
                                offset: 0,
                            })
                        } else {
                            Box::new(Missing)
                        }
                    }
                }
            }
        };
        futures_util::future::ready(provider).boxed()
    }
}

/// An in-memory asset, or a directory when `asset` is `None`.
struct EmbeddedProvider {
    asset: Option<EmbeddedAsset>,
    offset: u64,
}

impl ResourceProvider for EmbeddedProvider {
    fn exists(&self) -> bool {
        true
    }

    fn is_directory(&self) -> bool {
        self.asset.is_none()
    }

    fn last_modified(&self) -> Option<SystemTime> {
        self.asset.as_ref().and_then(|a| a.last_modified)
    }

    fn size(&self) -> Option<u64> {
        self.asset.as_ref().map(|a| a.content.len() as u64)
    }

    fn skip(&mut self, offset: u64) -> bool {
        match &self.asset {
            Some(asset) if offset <= asset.content.len() as u64 => {
                self.offset = offset;
                true
            }
            _ => false,
        }
    }

    fn transfer<'a>(
        &'a mut self,
        response: &'a Response,
        include_body: bool,
        max_bytes: u64,
    ) -> BoxFuture<'a, Result<(), TransferError>> {
        async move {
            let Some(asset) = self.asset.as_ref().filter(|_| include_body) else {
                return Ok(());
            };
            let start = self.offset as usize;
            let end = (self.offset.saturating_add(max_bytes)).min(asset.content.len() as u64) as usize;
            let mut body = asset.content.slice(start..end);
            while !body.is_empty() {
                let chunk = body.split_to(body.len().min(TRANSFER_CHUNK_SIZE));
                response.write(chunk).await?;
            }
            Ok(())
        }
        .boxed()
    }
}
