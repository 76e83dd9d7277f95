//! Shared memory primitives for sluice rings.
//!
//! A ring lives in one named, file-backed, memory-mapped region. On Linux the
//! backing files sit in `/dev/shm` (tmpfs, RAM-backed, visible to every
//! process); elsewhere a temp-directory fallback keeps the same semantics at
//! page-cache speed. The mapping itself is plain bytes — all structure
//! (header, cursors, slot table) is imposed by the `ring` module.

pub(crate) mod platform;
pub(crate) mod shm_region;

pub use platform::{has_native_shm, ring_dir, RING_DIR_ENV};
pub use shm_region::ShmRegion;
