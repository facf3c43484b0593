use parking_lot::Mutex;
use std::io;
use std::path::Path;

use crate::ports::{DiskSpace, SpaceProbe};

/// Reads space via `statvfs`/`GetDiskFreeSpaceEx`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fs2SpaceProbe;

impl SpaceProbe for Fs2SpaceProbe {
    fn space(&self, path: &Path) -> io::Result<DiskSpace> {
        Ok(DiskSpace {
            available: fs2::available_space(path)?,
            total: fs2::total_space(path)?,
        })
    }
}

/// Fixed answers for tests. `None` simulates an unreadable disk.
#[derive(Debug, Default)]
pub struct MockSpaceProbe {
    space: Mutex<Option<DiskSpace>>,
}

impl MockSpaceProbe {
    pub fn new(available: u64, total: u64) -> Self {
        Self {
            space: Mutex::new(Some(DiskSpace { available, total })),
        }
    }

    pub fn set(&self, space: Option<DiskSpace>) {
        *self.space.lock() = space;
    }
}

impl SpaceProbe for MockSpaceProbe {
    fn space(&self, _path: &Path) -> io::Result<DiskSpace> {
        self.space
            .lock()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "disk unavailable"))
    }
}
