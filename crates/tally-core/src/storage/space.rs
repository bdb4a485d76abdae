//! Free-space guard consulted before every write.

use std::io;
use std::path::{Path, PathBuf};

use sysinfo::Disks;

use super::store::StoreError;

/// Reports free space on the volume that holds a path.
pub trait SpaceProbe: Send + Sync {
    /// Available bytes, or `None` when the volume cannot be determined.
    fn available_bytes(&self, path: &Path) -> io::Result<Option<u64>>;
}

/// Probe backed by the system disk list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl SpaceProbe for SysinfoProbe {
    fn available_bytes(&self, path: &Path) -> io::Result<Option<u64>> {
        let path = path.canonicalize()?;
        let disks = Disks::new_with_refreshed_list();
        // The volume is the disk with the longest mount point containing the path.
        let disk = disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len());
        Ok(disk.map(|d| d.available_space()))
    }
}

/// Outcome of a space check that allows the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpaceCheck {
    Plenty,
    /// Below the advisory level; a warning was logged.
    Low,
    Unknown,
}

pub(crate) struct DiskGuard {
    dir: PathBuf,
    min_free_bytes: u64,
    warn_free_bytes: u64,
    probe: Box<dyn SpaceProbe>,
}

impl DiskGuard {
    pub(crate) fn new(dir: PathBuf, min_free_bytes: u64, warn_free_bytes: u64) -> Self {
        Self {
            dir,
            min_free_bytes,
            warn_free_bytes,
            probe: Box::new(SysinfoProbe),
        }
    }

    pub(crate) fn set_probe(&mut self, probe: Box<dyn SpaceProbe>) {
        self.probe = probe;
    }

    /// Fails when free space is below the minimum; warns below the advisory level.
    pub(crate) fn check(&self) -> Result<SpaceCheck, StoreError> {
        let Some(available) = self.probe.available_bytes(&self.dir)? else {
            tracing::debug!(dir = %self.dir.display(), "no volume found for data directory, skipping space check");
            return Ok(SpaceCheck::Unknown);
        };

        if available < self.min_free_bytes {
            return Err(StoreError::InsufficientSpace {
                path: self.dir.clone(),
                available,
                required: self.min_free_bytes,
            });
        }
        if available < self.warn_free_bytes {
            tracing::warn!(
                dir = %self.dir.display(),
                available,
                threshold = self.warn_free_bytes,
                "disk space is running low"
            );
            return Ok(SpaceCheck::Low);
        }
        Ok(SpaceCheck::Plenty)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Probe that reports a fixed amount of free space.
    pub(crate) struct FixedProbe(pub Option<u64>);

    impl SpaceProbe for FixedProbe {
        fn available_bytes(&self, _path: &Path) -> io::Result<Option<u64>> {
            Ok(self.0)
        }
    }

    fn guard(available: Option<u64>) -> DiskGuard {
        let mut guard = DiskGuard::new(PathBuf::from("/data"), 100, 1_000);
        guard.set_probe(Box::new(FixedProbe(available)));
        guard
    }

    #[test]
    fn below_minimum_is_rejected() {
        let err = guard(Some(99)).check().unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientSpace { available: 99, required: 100, .. }
        ));
    }

    #[test]
    fn below_warning_threshold_warns_and_allows() {
        assert_eq!(guard(Some(500)).check().unwrap(), SpaceCheck::Low);
        assert_eq!(guard(Some(1_000)).check().unwrap(), SpaceCheck::Plenty);
    }

    #[test]
    fn unknown_volume_is_not_an_error() {
        assert_eq!(guard(None).check().unwrap(), SpaceCheck::Unknown);
    }
}
