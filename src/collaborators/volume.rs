use std::path::PathBuf;

use crate::core::error::Result;
use crate::core::state::StateStore;
use crate::util::fs::ensure_dir;

/// A resolved volume location on the host.
pub struct VolumeHandle {
    pub path: PathBuf,
}

/// Named-volume storage, consumed by `RootfsSetup` when a `Mount::Volume`
/// has no pre-resolved host path. The default implementation is filesystem
/// backed, rooted at `<state root>/volumes/<name>/_data`, auto-creating on
/// miss — a real deployment could swap this for a networked volume driver
/// without the core needing to change.
pub trait VolumeStore {
    fn exists(&self, name: &str) -> Result<bool>;
    fn create(&self, name: &str) -> Result<VolumeHandle>;
    fn get(&self, name: &str) -> Result<VolumeHandle>;
}

pub struct FsVolumeStore {
    store: StateStore,
}

impl FsVolumeStore {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl VolumeStore for FsVolumeStore {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.store.volume_data_dir(name).is_dir())
    }

    fn create(&self, name: &str) -> Result<VolumeHandle> {
        let path = self.store.volume_data_dir(name);
        ensure_dir(&path).map_err(|e| crate::core::error::Error::IoFailure(e.to_string()))?;
        Ok(VolumeHandle { path })
    }

    /// Resolve `name`, creating it on miss per the spec's "auto-creates on
    /// miss" requirement.
    fn get(&self, name: &str) -> Result<VolumeHandle> {
        if self.exists(name)? {
            Ok(VolumeHandle {
                path: self.store.volume_data_dir(name),
            })
        } else {
            self.create(name)
        }
    }
}
