//! Key-share storage as seen by the coordination layer.
//!
//! The signer owns the key material; this layer only needs to know which TSS
//! public keys have a local share.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{OrchestrationError, Result};

const SHARE_FILE_PREFIX: &str = "localstate-";
const SHARE_FILE_SUFFIX: &str = ".json";

pub trait Keystore: Send + Sync {
    /// Bech32 TSS pubkeys with a local key share.
    fn pubkeys(&self) -> Result<BTreeSet<String>>;

    fn has_key_share(&self, pubkey: &str) -> Result<bool> {
        Ok(self.pubkeys()?.contains(pubkey))
    }
}

/// Key shares stored as `localstate-<bech32 pubkey>.json` files in one
/// directory.
#[derive(Debug, Clone)]
pub struct FileKeystore {
    dir: PathBuf,
}

impl FileKeystore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the share file for `pubkey`.
    pub fn share_path(&self, pubkey: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", SHARE_FILE_PREFIX, pubkey, SHARE_FILE_SUFFIX))
    }
}

impl Keystore for FileKeystore {
    fn pubkeys(&self) -> Result<BTreeSet<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            OrchestrationError::Keystore(format!("reading {}: {}", self.dir.display(), e))
        })?;

        let mut pubkeys = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| OrchestrationError::Keystore(e.to_string()))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }

            let name = entry.file_name();
            let Some(pubkey) = name
                .to_str()
                .and_then(|n| n.strip_prefix(SHARE_FILE_PREFIX))
                .and_then(|n| n.strip_suffix(SHARE_FILE_SUFFIX))
            else {
                continue;
            };

            // Only the pubkey may follow the prefix
            if pubkey.is_empty() || pubkey.contains('-') {
                debug!(file = ?name, "Skipping malformed key share file name");
                continue;
            }

            pubkeys.insert(pubkey.to_string());
        }

        info!(dir = %self.dir.display(), count = pubkeys.len(), "Found key share files");
        Ok(pubkeys)
    }
}
