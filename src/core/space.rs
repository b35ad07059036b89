//! Free-space probing for the disk-space gate

use std::path::{Path, PathBuf};

use sysinfo::Disks;

/// Reports free bytes on the volume that would hold `path`
pub trait SpaceProbe: Send + Sync {
    /// `None` when the volume cannot be determined
    fn available(&self, path: &Path) -> Option<u64>;
}

/// Queries mounted disks through sysinfo
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpace;

impl SpaceProbe for SystemSpace {
    fn available(&self, path: &Path) -> Option<u64> {
        let target = nearest_existing_path(path);
        let target = std::fs::canonicalize(&target).unwrap_or(target);
        let disks = Disks::new_with_refreshed_list();

        // longest mount point containing the target wins
        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// Always reports the same amount; for tests and quota-style limits
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available(&self, _path: &Path) -> Option<u64> {
        Some(self.0)
    }
}

fn nearest_existing_path(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    while !candidate.exists() {
        if !candidate.pop() {
            return PathBuf::from(".");
        }
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_nearest_existing_path_walks_up() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("a").join("b").join("c.bin");
        assert_eq!(nearest_existing_path(&missing), dir.path());
    }

    #[test]
    fn test_fixed_space() {
        assert_eq!(FixedSpace(10).available(Path::new("/anywhere")), Some(10));
    }
}
