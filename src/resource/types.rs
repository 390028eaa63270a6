//! File extension to content type mapping.

use std::collections::HashMap;

/// Content type plus any extra headers sent with files of that type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceType {
    pub mime_type: String,
    pub headers: Vec<(String, String)>,
}

impl ResourceType {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header sent with every file of this type.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Type used for unknown extensions.
    pub fn fallback() -> Self {
        Self::new("application/octet-stream")
    }
}

const DEFAULT_MAPPINGS: &[(&str, &str)] = &[
    ("html", "text/html;charset=utf-8"),
    ("htm", "text/html;charset=utf-8"),
    ("css", "text/css;charset=utf-8"),
    ("js", "application/javascript;charset=utf-8"),
    ("mjs", "application/javascript;charset=utf-8"),
    ("json", "application/json;charset=utf-8"),
    ("map", "application/json;charset=utf-8"),
    ("txt", "text/plain;charset=utf-8"),
    ("md", "text/markdown;charset=utf-8"),
    ("csv", "text/csv;charset=utf-8"),
    ("xml", "application/xml;charset=utf-8"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("wasm", "application/wasm"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
];

/// Extension lookup table. Extensions are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct ResourceTypes {
    by_extension: HashMap<String, ResourceType>,
    fallback: ResourceType,
}

impl Default for ResourceTypes {
    fn default() -> Self {
        let mut by_extension: HashMap<String, ResourceType> = DEFAULT_MAPPINGS
            .iter()
            .map(|(ext, mime)| (ext.to_string(), ResourceType::new(*mime)))
            .collect();
        by_extension.insert(
            "appcache".to_string(),
            ResourceType::new("text/cache-manifest").with_header("cache-control", "no-cache"),
        );
        Self {
            by_extension,
            fallback: ResourceType::fallback(),
        }
    }
}

impl ResourceTypes {
    /// An empty table: every file gets the fallback type.
    pub fn empty() -> Self {
        Self {
            by_extension: HashMap::new(),
            fallback: ResourceType::fallback(),
        }
    }

    /// Map an extension (without the dot) to a type, replacing any existing mapping.
    pub fn insert(&mut self, extension: &str, resource_type: ResourceType) {
        self.by_extension
            .insert(extension.to_ascii_lowercase(), resource_type);
    }

    /// Type for a file name or path.
    pub fn for_file(&self, filename: &str) -> &ResourceType {
        let name = filename.rsplit('/').next().unwrap_or(filename);
        name.rsplit_once('.')
            .and_then(|(_, ext)| self.by_extension.get(&ext.to_ascii_lowercase()))
            .unwrap_or(&self.fallback)
    }
}
