//! Mount backends and space probes.

mod directory;
mod memory;
mod space;

pub use directory::DirectoryMountBackend;
pub use memory::InMemoryMountBackend;
pub use space::{Fs2SpaceProbe, MockSpaceProbe};
