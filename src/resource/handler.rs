//! Static resource handler.
//!
//! # Responsibilities
//! - Map request paths under a mount prefix to provider paths
//! - Redirect directory requests to their slash-terminated form
//! - Set content headers, answer conditional and range requests
//! - Stream the selected bytes, then complete the request
//!
//! # Design Decisions
//! - Only `GET` and `HEAD` are claimed; other methods fall through the chain
//! - `HEAD` sends exactly the headers `GET` would
//! - Malformed `Range` or `If-Modified-Since` values are ignored, not rejected
//! - A failed transfer (usually a client that went away) is logged at debug

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use futures_util::FutureExt;

use crate::dispatch::{AsyncContext, AsyncHandler, ClaimFuture};
use crate::error::HandlerError;
use crate::resource::negotiate;
use crate::resource::provider::{EmbeddedProviderFactory, FileProviderFactory, ProviderFactory, ResourceProvider};
use crate::resource::types::ResourceTypes;

/// Serves static resources from a [`ProviderFactory`].
#[derive(Clone)]
pub struct ResourceHandler {
    factory: Arc<dyn ProviderFactory>,
    mount: String,
    default_file: Option<String>,
    types: Arc<ResourceTypes>,
}

impl std::fmt::Debug for ResourceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandler")
            .field("mount", &self.mount)
            .field("default_file", &self.default_file)
            .finish()
    }
}

impl ResourceHandler {
    /// Serve from `factory` at `/`, with `index.html` as the default file.
    pub fn new(factory: impl ProviderFactory) -> Self {
        Self {
            factory: Arc::new(factory),
            mount: "/".to_string(),
            default_file: Some("index.html".to_string()),
            types: Arc::new(ResourceTypes::default()),
        }
    }

    /// Serve files below `directory`.
    pub fn file_handler(directory: impl Into<PathBuf>) -> Self {
        Self::new(FileProviderFactory::new(directory))
    }

    /// Serve in-memory assets.
    pub fn embedded(assets: EmbeddedProviderFactory) -> Self {
        Self::new(assets)
    }

    /// URL prefix the resources live under, e.g. `/static`.
    pub fn with_mount(mut self, mount: &str) -> Self {
        let trimmed = mount.trim_end_matches('/');
        self.mount = if trimmed.is_empty() {
            "/".to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        self
    }

    /// File served for paths ending in `/`. `None` disables it.
    pub fn with_default_file(mut self, default_file: Option<&str>) -> Self {
        self.default_file = default_file.map(str::to_string);
        self
    }

    pub fn with_types(mut self, types: ResourceTypes) -> Self {
        self.types = Arc::new(types);
        self
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Path below the mount, or `None` if the request is outside it.
    fn relative_path<'p>(&self, request_path: &'p str) -> Option<&'p str> {
        if self.mount == "/" {
            return Some(request_path);
        }
        let rest = request_path.strip_prefix(self.mount.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    async fn serve(self, ctx: AsyncContext) -> Result<bool, HandlerError> {
        let request = ctx.request();
        let method = request.method();
        if method != Method::GET && method != Method::HEAD {
            return Ok(false);
        }

        let request_path = request.path();
        let Some(relative) = self.relative_path(request_path) else {
            return Ok(false);
        };
        let mut relative = relative.to_string();
        if relative.is_empty() || relative.ends_with('/') {
            match &self.default_file {
                Some(default_file) => {
                    if relative.is_empty() {
                        relative.push('/');
                    }
                    relative.push_str(default_file);
                }
                None if relative.is_empty() => relative.push('/'),
                None => {}
            }
        }

        let Ok(decoded) = urlencoding::decode(&relative) else {
            tracing::debug!(path = request_path, "Declining path that is not valid UTF-8 once decoded");
            return Ok(false);
        };

        let mut provider = self.factory.get(&decoded).await;
        if !provider.exists() {
            return Ok(false);
        }

        let response = ctx.response();
        if provider.is_directory() {
            if request_path.ends_with('/') {
                // No default file and no listings.
                return Ok(false);
            }
            response.redirect(&format!("{request_path}/"));
            ctx.complete();
            return Ok(true);
        }

        let total = provider.size();
        self.set_headers(&ctx, &relative, provider.as_ref());

        let mut send_body = method != Method::HEAD;
        if let (Some(modified), Some(since)) =
            (provider.last_modified(), request.header(header::IF_MODIFIED_SINCE))
        {
            match negotiate::is_not_modified(modified, since) {
                Ok(true) => {
                    response.set_status(StatusCode::NOT_MODIFIED);
                    send_body = false;
                }
                Ok(false) => {}
                Err(e) => tracing::info!(error = %e, "Ignoring cache check due to invalid If-Modified-Since header"),
            }
        }

        let mut max_bytes = u64::MAX;
        if let (Some(total), Some(range), true) = (
            total,
            request.header(header::RANGE),
            response.status() != StatusCode::NOT_MODIFIED,
        ) {
            match negotiate::parse_ranges(total, range) {
                Ok(ranges) if ranges.len() == 1 => {
                    let range = ranges[0];
                    if provider.skip(range.from) {
                        max_bytes = range.length();
                        response.set_status(StatusCode::PARTIAL_CONTENT);
                        response.set_content_length(max_bytes);
                        if let Ok(value) = HeaderValue::from_str(&range.content_range(total)) {
                            response.set_header(header::CONTENT_RANGE, value);
                        }
                    }
                }
                Ok(ranges) => tracing::debug!(count = ranges.len(), "Ignoring multi-range request"),
                Err(e) => tracing::info!(error = %e, "Ignoring range request due to invalid Range header"),
            }
        }

        let path = request_path.to_string();
        let transfer_ctx = ctx.clone();
        ctx.spawn(async move {
            let response = transfer_ctx.response();
            if let Err(e) = provider.transfer(response, send_body, max_bytes).await {
                tracing::debug!(path = %path, error = %e, "Client went away before the full response was sent");
            }
            transfer_ctx.complete();
        });
        Ok(true)
    }

    fn set_headers(&self, ctx: &AsyncContext, path: &str, provider: &dyn ResourceProvider) {
        let response = ctx.response();
        let resource_type = self.types.for_file(path);
        response.set_content_type(&resource_type.mime_type);
        response.set_header(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        response.set_header(header::VARY, HeaderValue::from_static("accept-encoding"));
        if let Some(size) = provider.size() {
            response.set_content_length(size);
        }
        if let Some(modified) = provider.last_modified() {
            if let Ok(value) = HeaderValue::from_str(&negotiate::http_date(modified)) {
                response.set_header(header::LAST_MODIFIED, value);
            }
        }
        if let Some(etag) = provider.etag() {
            if let Ok(value) = HeaderValue::from_str(&etag) {
                response.set_header(header::ETAG, value);
            }
        }
        for (name, value) in &resource_type.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => response.append_header(name, value),
                _ => tracing::warn!(header = %name, "Skipping invalid resource type header"),
            }
        }
    }
}

impl AsyncHandler for ResourceHandler {
    fn on_headers(&self, ctx: &AsyncContext, _headers: &HeaderMap) -> ClaimFuture {
        self.clone().serve(ctx.clone()).boxed()
    }

    fn name(&self) -> &'static str {
        "ResourceHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_is_normalized() {
        let factory = EmbeddedProviderFactory::new();
        assert_eq!(ResourceHandler::embedded(factory.clone()).with_mount("static/").mount(), "/static");
        assert_eq!(ResourceHandler::embedded(factory.clone()).with_mount("/").mount(), "/");
        assert_eq!(ResourceHandler::embedded(factory).with_mount("").mount(), "/");
    }

    #[test]
    fn relative_paths_respect_segment_boundaries() {
        let handler = ResourceHandler::embedded(EmbeddedProviderFactory::new()).with_mount("/static");
        assert_eq!(handler.relative_path("/static/a.css"), Some("/a.css"));
        assert_eq!(handler.relative_path("/static"), Some(""));
        assert_eq!(handler.relative_path("/statics/a.css"), None);
        assert_eq!(handler.relative_path("/other"), None);
    }
}
