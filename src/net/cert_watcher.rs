//! Certificate file watcher for TLS hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::net::tls::{TlsContext, TlsContextHolder};
use crate::observability::metrics;

/// Watches a certificate/key pair and swaps the active TLS identity when
/// either file changes.
pub struct CertWatcher {
    cert_path: PathBuf,
    key_path: PathBuf,
    holder: Arc<TlsContextHolder>,
}

impl CertWatcher {
    /// Create a new watcher for the given files.
    pub fn new(cert_path: &Path, key_path: &Path, holder: Arc<TlsContextHolder>) -> Self {
        Self {
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
            holder,
        }
    }

    /// Reload both files and swap the identity. Keeps the current identity on failure.
    pub fn reload(&self) -> bool {
        match TlsContext::from_pem_files(&self.cert_path, &self.key_path) {
            Ok(context) => {
                self.holder.change_context(context);
                metrics::record_tls_reload(true);
                true
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    cert_path = ?self.cert_path,
                    "Failed to reload TLS identity. Keeping current identity."
                );
                metrics::record_tls_reload(false);
                false
            }
        }
    }

    /// Start watching in a background thread. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let cert_path = self.cert_path.clone();
        let key_path = self.key_path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(paths = ?event.paths, "Certificate change detected, reloading...");
                        self.reload();
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&cert_path, RecursiveMode::NonRecursive)?;
        if key_path != cert_path {
            watcher.watch(&key_path, RecursiveMode::NonRecursive)?;
        }

        tracing::info!(cert_path = ?cert_path, key_path = ?key_path, "Certificate watcher started");
        Ok(watcher)
    }
}
