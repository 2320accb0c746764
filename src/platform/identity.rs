//! Process-lifetime cache of the platform identity and its catalog record.
//!
//! The identity is the first line of the DMI product name file. It is read at
//! most once per [`PlatformCache`]; a failed read is remembered and never
//! retried. Concurrent first callers serialize on the cache lock, so exactly
//! one read happens and every caller sees the same outcome.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{trace, warn};

use super::catalog::{lookup_capabilities, PlatformCapabilityRecord};
use crate::constants::paths::PRODUCT_NAME_PATH;

static GLOBAL_PLATFORM_CACHE: Lazy<PlatformCache> =
    Lazy::new(|| PlatformCache::new(PRODUCT_NAME_PATH));

/// Memoized platform identity and capability lookup.
#[derive(Debug)]
pub struct PlatformCache {
    /// Descriptor file holding the identity.
    source: PathBuf,
    /// `None` until resolved; then the cached identity (or cached failure).
    identity: Mutex<Option<Option<String>>>,
    /// `None` until resolved; then the cached record (or cached miss).
    capabilities: Mutex<Option<Option<&'static PlatformCapabilityRecord>>>,
    /// Number of times the descriptor file was opened.
    reads: AtomicUsize,
}

impl PlatformCache {
    /// Create a cache that reads its identity from `source`.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            identity: Mutex::new(None),
            capabilities: Mutex::new(None),
            reads: AtomicUsize::new(0),
        }
    }

    /// Process-wide cache backed by the DMI product name file.
    pub fn global() -> &'static PlatformCache {
        &GLOBAL_PLATFORM_CACHE
    }

    /// Path of the descriptor file.
    pub fn source_path(&self) -> &Path {
        &self.source
    }

    /// The platform identity, or `None` if it could not be determined.
    pub fn identity(&self) -> Option<String> {
        let mut slot = self.identity.lock();
        if let Some(cached) = slot.as_ref() {
            return cached.clone();
        }

        self.reads.fetch_add(1, Ordering::SeqCst);
        let resolved = match read_first_line(&self.source) {
            Ok(identity) => {
                trace!("EC2 platform type is {}", identity);
                Some(identity)
            }
            Err(e) => {
                warn!("Error reading file {}: {}", self.source.display(), e);
                None
            }
        };

        *slot = Some(resolved.clone());
        resolved
    }

    /// Catalog record for the platform identity, if the platform is known.
    pub fn capabilities(&self) -> Option<&'static PlatformCapabilityRecord> {
        let mut slot = self.capabilities.lock();
        if let Some(cached) = *slot {
            return cached;
        }

        let record = self.identity().as_deref().and_then(lookup_capabilities);
        *slot = Some(record);
        record
    }

    /// How many times the descriptor file has been opened.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Identity of the current host, read once per process.
pub fn get_platform_identity() -> Option<String> {
    PlatformCache::global().identity()
}

/// Catalog record of the current host, resolved once per process.
pub fn platform_capabilities() -> Option<&'static PlatformCapabilityRecord> {
    PlatformCache::global().capabilities()
}

/// Read the first line of `path` without its trailing newline.
fn read_first_line(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}
