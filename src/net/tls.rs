//! TLS identity loading and hot swapping.
//!
//! # Responsibilities
//! - Build a rustls `ServerConfig` from PEM files, PEM bytes, DER or a
//!   generated self-signed certificate
//! - Hold the active identity behind an atomically swappable reference
//! - Hand each accepted connection exactly one snapshot of it
//!
//! # Design Decisions
//! - `ArcSwap` gives lock-free reads on the accept path
//! - Swapping never touches established sessions: they own their snapshot
//! - The ring provider is selected explicitly so no process default is needed

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

/// Errors raised while building a TLS identity.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PEM data: {0}")]
    Pem(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::RcgenError),
}

/// An immutable TLS identity: certificate chain, key and protocol settings.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<ServerConfig>,
    leaf: CertificateDer<'static>,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("leaf_len", &self.leaf.len())
            .finish()
    }
}

impl TlsContext {
    /// Build from a DER certificate chain and private key.
    pub fn from_der(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, TlsError> {
        let leaf = chain
            .first()
            .cloned()
            .ok_or_else(|| TlsError::Pem("certificate chain is empty".into()))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(chain, key)?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            config: Arc::new(config),
            leaf,
        })
    }

    /// Build from PEM-encoded certificate chain and private key bytes.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let chain = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Pem(e.to_string()))?;
        if chain.is_empty() {
            return Err(TlsError::Pem("no certificates found".into()));
        }
        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| TlsError::Pem(e.to_string()))?
            .ok_or_else(|| TlsError::NoPrivateKey("PEM input".into()))?;
        Self::from_der(chain, key)
    }

    /// Load certificate chain and private key from PEM files.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let open = |path: &Path| {
            File::open(path).map(BufReader::new).map_err(|source| TlsError::Io {
                path: path.display().to_string(),
                source,
            })
        };

        let chain = rustls_pemfile::certs(&mut open(cert_path)?)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TlsError::Io {
                path: cert_path.display().to_string(),
                source,
            })?;
        if chain.is_empty() {
            return Err(TlsError::Pem(format!(
                "no certificates found in {}",
                cert_path.display()
            )));
        }

        let key = rustls_pemfile::private_key(&mut open(key_path)?)
            .map_err(|source| TlsError::Io {
                path: key_path.display().to_string(),
                source,
            })?
            .ok_or_else(|| TlsError::NoPrivateKey(key_path.display().to_string()))?;

        Self::from_der(chain, key)
    }

    /// Generate a throwaway self-signed certificate for the given host names.
    pub fn self_signed(hostnames: &[&str]) -> Result<Self, TlsError> {
        let names = hostnames.iter().map(|h| h.to_string()).collect::<Vec<_>>();
        let cert = rcgen::generate_simple_self_signed(names)?;
        let der = CertificateDer::from(cert.serialize_der()?);
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));
        Self::from_der(vec![der], key)
    }

    /// Self-signed identity for `localhost`.
    pub fn unsigned_localhost() -> Result<Self, TlsError> {
        Self::self_signed(&["localhost"])
    }

    /// The end-entity certificate this identity presents.
    pub fn leaf_certificate(&self) -> &CertificateDer<'static> {
        &self.leaf
    }

    /// The rustls configuration used for handshakes.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }
}

/// Swappable reference to the active TLS identity.
#[derive(Debug)]
pub struct TlsContextHolder {
    current: ArcSwap<TlsContext>,
}

impl TlsContextHolder {
    /// Create a holder with an initial identity.
    pub fn new(context: TlsContext) -> Self {
        Self {
            current: ArcSwap::from_pointee(context),
        }
    }

    /// Snapshot of the identity active right now.
    pub fn snapshot(&self) -> Arc<TlsContext> {
        self.current.load_full()
    }

    /// Acceptor bound to the current snapshot, for one new connection.
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.snapshot().server_config())
    }

    /// Atomically replace the active identity. Returns once committed.
    pub fn change_context(&self, context: TlsContext) {
        self.current.store(Arc::new(context));
        tracing::info!("TLS identity replaced");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_identity_builds() {
        let ctx = TlsContext::unsigned_localhost().unwrap();
        assert!(!ctx.leaf_certificate().is_empty());
        assert_eq!(ctx.server_config().alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn pem_round_trip_keeps_leaf() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_pem = cert.serialize_pem().unwrap();
        let key_pem = cert.serialize_private_key_pem();

        let expected = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .unwrap()
            .unwrap();

        let ctx = TlsContext::from_pem(cert_pem.as_bytes(), key_pem.as_bytes()).unwrap();
        assert_eq!(ctx.leaf_certificate(), &expected);
    }

    #[test]
    fn pem_without_key_is_rejected() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_pem = cert.serialize_pem().unwrap();
        let err = TlsContext::from_pem(cert_pem.as_bytes(), b"").unwrap_err();
        assert!(matches!(err, TlsError::NoPrivateKey(_)));
    }

    #[test]
    fn missing_files_report_path() {
        let err = TlsContext::from_pem_files(Path::new("/nope/cert.pem"), Path::new("/nope/key.pem"))
            .unwrap_err();
        assert!(err.to_string().contains("/nope/cert.pem"));
    }

    #[test]
    fn snapshots_survive_a_swap() {
        let first = TlsContext::unsigned_localhost().unwrap();
        let second = TlsContext::unsigned_localhost().unwrap();
        let holder = TlsContextHolder::new(first.clone());

        let before = holder.snapshot();
        holder.change_context(second.clone());
        let after = holder.snapshot();

        assert_eq!(before.leaf_certificate(), first.leaf_certificate());
        assert_eq!(after.leaf_certificate(), second.leaf_certificate());
        assert_ne!(before.leaf_certificate(), after.leaf_certificate());
    }
}
