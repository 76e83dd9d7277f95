//! Platform resolution for the ring directory.
//!
//! - Linux: `/dev/shm/sluice/rings` (tmpfs — RAM-backed, no disk I/O)
//! - everywhere else: `<tmpdir>/sluice/rings` (page-cache backed fallback)
//!
//! `SLUICE_RING_DIR` overrides both; tests point it at a scratch directory so
//! concurrent test runs cannot collide on ring names.

use std::path::PathBuf;

/// Environment variable overriding the ring directory.
pub const RING_DIR_ENV: &str = "SLUICE_RING_DIR";

/// Directory holding the backing files of all named rings.
///
/// Re-read on every call so a test or tool can redirect it before creating
/// rings; processes sharing rings must agree on the value.
pub fn ring_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(RING_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if cfg!(target_os = "linux") {
        let dev_shm = PathBuf::from("/dev/shm");
        if dev_shm.is_dir() {
            return dev_shm.join("sluice").join("rings");
        }
    }
    std::env::temp_dir().join("sluice").join("rings")
}

/// Whether the RAM-backed (`/dev/shm`) path is in use.
pub fn has_native_shm() -> bool {
    cfg!(target_os = "linux")
        && std::env::var(RING_DIR_ENV).map(|v| v.is_empty()).unwrap_or(true)
        && PathBuf::from("/dev/shm").is_dir()
}
