//! # rc-registry-json
//! Loads the purpose/vendor/special-feature registry from a JSON vendor-list
//! file and serves the parsed snapshot from memory.
//!
//! A reload swaps the whole snapshot. Validations already holding the old
//! `Arc` finish against the version they started with.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rc_core::registry::RegistrySnapshot;
use rc_core::traits::RegistryProvider;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct JsonFileRegistry {
    path: PathBuf,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl JsonFileRegistry {
    pub async fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let snapshot = read_snapshot(&path).await?;
        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Re-reads the file. On failure the previous snapshot stays in place.
    pub async fn reload(&self) -> anyhow::Result<u32> {
        let fresh = read_snapshot(&self.path).await?;
        let version = fresh.version;
        let mut guard = self.snapshot.write().await;
        if version < guard.version {
            warn!(current = guard.version, loaded = version, "registry file is older than the loaded snapshot");
        }
        *guard = Arc::new(fresh);
        Ok(version)
    }
}

async fn read_snapshot(path: &Path) -> anyhow::Result<RegistrySnapshot> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading registry {}", path.display()))?;
    let snapshot: RegistrySnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("parsing registry {}", path.display()))?;

    // Vendors pointing at purposes the list does not define are kept, since
    // decisions are validated per namespace, but they usually mean a stale file.
    for (vendor_id, vendor) in &snapshot.vendors {
        let dangling = vendor
            .purpose_ids
            .iter()
            .chain(&vendor.legitimate_interest_purpose_ids)
            .filter(|p| !snapshot.purposes.contains_key(*p))
            .count();
        if dangling > 0 {
            warn!(vendor = %vendor_id, dangling, "vendor references undefined purposes");
        }
    }

    info!(
        version = snapshot.version,
        purposes = snapshot.purposes.len(),
        vendors = snapshot.vendors.len(),
        special_features = snapshot.special_features.len(),
        "registry loaded"
    );
    Ok(snapshot)
}

#[async_trait]
impl RegistryProvider for JsonFileRegistry {
    async fn latest(&self) -> anyhow::Result<Arc<RegistrySnapshot>> {
        Ok(Arc::clone(&*self.snapshot.read().await))
    }
}
