//! Plugin execution: environment setup, store selection and mode dispatch.

use crate::settings::{Backend, Mode, Settings};
use stash_cache::{Cache, ExpiryPolicy, FilesystemStore, Flusher, RestoreOutcome};
use stash_core::{Error, ObjectStore, Result};
use stash_s3::S3Store;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// System CA bundle replaced by `--cacert` / `--cacert-path`.
pub const CA_BUNDLE_PATH: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Prepare the process environment, connect to the store and run the mode.
pub async fn execute(settings: &Settings) -> Result<()> {
    if let Some(dir) = &settings.workdir {
        std::env::set_current_dir(dir).map_err(|e| {
            error!(workdir = %dir.display(), error = %e, "Unable to change workdir");
            Error::archive(dir, e)
        })?;
        info!(workdir = %dir.display(), "Changed workdir");
    }

    install_ca_certs(settings, Path::new(CA_BUNDLE_PATH)).await;

    let store: Arc<dyn ObjectStore> = match &settings.backend {
        Backend::S3(options) => Arc::new(S3Store::connect(options.clone()).await),
        Backend::Filesystem(dir) => Arc::new(FilesystemStore::new(dir)),
    };

    run(settings, store, Path::new("")).await
}

/// Run the configured mode against `store`, restoring below `destination`.
///
/// An empty `destination` restores into the current directory. A restore
/// that finds nothing is logged and still succeeds.
pub async fn run(
    settings: &Settings,
    store: Arc<dyn ObjectStore>,
    destination: &Path,
) -> Result<()> {
    match settings.mode {
        Mode::Rebuild => {
            let key = settings.cache_key();
            info!(path = %key, mounts = ?settings.mounts, "Rebuilding cache");
            Cache::new(store, settings.format)
                .rebuild(&settings.mounts, &key)
                .await
        }
        Mode::Restore => {
            let key = settings.cache_key();
            let fallback = settings.fallback_key();
            info!(path = %key, fallback = %fallback, "Restoring cache");
            let cache = Cache::new(store, settings.format).with_destination(destination);
            match cache.restore(&key, &fallback).await? {
                RestoreOutcome::Restored { key, fallback } => {
                    info!(path = %key, fallback, "Cache restored");
                }
                RestoreOutcome::Missed { .. } => info!("No cache restored"),
            }
            Ok(())
        }
        Mode::Flush => {
            let prefix = settings.flush_prefix();
            info!(path = %prefix, max_age_days = settings.flush_age, "Flushing cache");
            let flusher = Flusher::new(store, ExpiryPolicy::days(settings.flush_age).predicate());
            let deleted = flusher.flush(&prefix).await?;
            info!(path = %prefix, deleted, "Cache flushed");
            Ok(())
        }
    }
}

/// Write the configured certificates over `bundle`.
///
/// Failures are logged; the transfer may still work with the existing bundle.
pub(crate) async fn install_ca_certs(settings: &Settings, bundle: &Path) {
    if let Some(cert) = &settings.cacert {
        info!(path = %bundle.display(), "Installing CA certificate");
        match tokio::fs::write(bundle, cert).await {
            Ok(()) => info!("Installed CA certificate"),
            Err(e) => {
                warn!(path = %bundle.display(), error = %e, "Failed to install CA certificate");
            }
        }
    }

    if let Some(source) = &settings.cacert_path {
        info!(path = %bundle.display(), source = %source.display(), "Installing CA certificate");
        match tokio::fs::copy(source, bundle).await {
            Ok(_) => info!("Installed CA certificate"),
            Err(e) => {
                warn!(path = %bundle.display(), error = %e, "Failed to install CA certificate");
            }
        }
    }
}
