//! Static resource serving.
//!
//! # Data Flow
//! ```text
//! GET /static/app.js
//!     → handler.rs (mount, default file, decode, directory redirect)
//!     → provider.rs (file system or embedded bytes)
//!     → negotiate.rs (If-Modified-Since → 304, Range → 206)
//!     → types.rs (Content-Type and per-type headers)
//!     → transfer through the response writer
//! ```

pub mod handler;
pub mod negotiate;
pub mod provider;
pub mod types;

pub use handler::ResourceHandler;
pub use negotiate::{ByteRange, ConditionalHeaderParseError, RangeParseError};
pub use provider::{
    EmbeddedProviderFactory, FileProviderFactory, ProviderFactory, ResourceProvider, TransferError,
};
pub use types::{ResourceType, ResourceTypes};
