//! Named shared-memory regions backed by memory-mapped files.
//!
//! Create/open are deliberately split: `create` is exclusive (the caller is
//! initializing a brand-new ring and must know it won the race), `open` maps
//! an existing region as-is. Neither touches the contents beyond the initial
//! zero-fill on create; header layout and initialization handshakes are the
//! `ring` module's business.

use crate::error::{SluiceError, SluiceResult};
use crate::memory::platform::ring_dir;
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::PathBuf;

/// Longest accepted region name. Keeps backing-file paths well under any
/// platform path limit.
const MAX_NAME_LEN: usize = 128;

/// Smallest region we will map. A region smaller than this cannot hold a
/// ring header, so it is rejected before mmap.
pub(crate) const MIN_REGION_SIZE: usize = 4096;

/// Largest region we will map (1 GiB). Catches unit mix-ups in capacity
/// arguments before they hit the allocator.
pub(crate) const MAX_REGION_SIZE: usize = 1 << 30;

/// A named, file-backed shared memory region.
///
/// Dropping unmaps but never unlinks; the backing file's lifetime is managed
/// by the ring registry (`remove` + last-detach), not by handle drops.
#[derive(Debug)]
pub struct ShmRegion {
    mmap: MmapMut,
    path: PathBuf,
    size: usize,
}

/// Reject names that would escape the ring directory or break the backing
/// file name.
pub(crate) fn validate_name(name: &str) -> SluiceResult<()> {
    if name.is_empty() {
        return Err(SluiceError::invalid_input("ring name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(SluiceError::invalid_input(format!(
            "ring name '{}...' exceeds {} bytes",
            &name[..32],
            MAX_NAME_LEN
        )));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(SluiceError::invalid_input(format!(
            "ring name '{}' contains path separators or control characters",
            name
        )));
    }
    if name == "." || name == ".." {
        return Err(SluiceError::invalid_input(format!(
            "ring name '{}' is a reserved path component",
            name
        )));
    }
    Ok(())
}

/// Backing-file path for a ring name.
pub(crate) fn region_path(name: &str) -> PathBuf {
    ring_dir().join(format!("sluice_{}", name))
}

impl ShmRegion {
    /// Create a brand-new region of `size` bytes, zero-filled.
    ///
    /// Fails `AlreadyExists` if the backing file is present — the caller owns
    /// the decision whether to reclaim a dead region first.
    pub fn create(name: &str, size: usize) -> SluiceResult<Self> {
        validate_name(name)?;
        if size < MIN_REGION_SIZE || size > MAX_REGION_SIZE {
            return Err(SluiceError::memory(format!(
                "Region size {} outside supported range [{}, {}]",
                size, MIN_REGION_SIZE, MAX_REGION_SIZE
            )));
        }

        let dir = ring_dir();
        std::fs::create_dir_all(&dir)?;
        let path = region_path(name);

        // O_EXCL: exactly one creator wins; losers see AlreadyExists.
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SluiceError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.set_len(size as u64)?;

        // SAFETY: file is freshly created with its length set to `size`
        // above; the mapping length matches the file length.
        let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        mmap.fill(0);

        log::debug!("created shm region '{}' ({} bytes) at {:?}", name, size, path);
        Ok(Self { mmap, path, size })
    }

    /// Map an existing region. Fails `NotFound` if the backing file is absent.
    pub fn open(name: &str) -> SluiceResult<Self> {
        validate_name(name)?;
        let path = region_path(name);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SluiceError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len() as usize;
        if size < MIN_REGION_SIZE {
            return Err(SluiceError::memory(format!(
                "Region '{}' is only {} bytes — truncated or not a ring",
                name, size
            )));
        }

        // SAFETY: file is open read-write and `size` was just read from its
        // metadata; the mapping length matches the file length.
        let mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        Ok(Self { mmap, path, size })
    }

    /// Remove the backing file of a region. Existing mappings stay valid
    /// until the last one is dropped (POSIX unlink semantics).
    pub fn unlink(name: &str) -> SluiceResult<()> {
        validate_name(name)?;
        let path = region_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("unlinked shm region '{}'", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SluiceError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a backing file of the given name exists.
    pub fn exists(name: &str) -> bool {
        validate_name(name).is_ok() && region_path(name).exists()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

// SAFETY: the mapping is shared between processes by design; all concurrent
// access goes through atomics in the ring header or through regions of the
// byte array that the cursor protocol hands to exactly one side at a time.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}
