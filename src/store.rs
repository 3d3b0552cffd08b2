use core::ptr::NonNull;

use crate::error::Result;

/// How to open a backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file, or truncate it to zero if it already exists.
    CreateOrWipe,
    /// Open an existing file; fail if it does not exist.
    OpenExisting,
}

/// A live view of the mapped backing region.
///
/// The region is only valid between a `map` and the matching `unmap`; the
/// container never keeps derived pointers across a remap, only `u32`
/// offsets into the region.
pub(crate) struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    /// # Safety
    ///
    /// `base` must point to `len` readable and writable bytes that stay
    /// valid and unaliased until the region is handed back to `unmap`.
    pub(crate) unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: guaranteed valid and unaliased by the `new` contract.
        unsafe { core::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    #[inline(always)]
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: guaranteed valid and unaliased by the `new` contract.
        unsafe { core::slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }
}

/// Capability interface over the byte source backing a container.
///
/// This is the only dynamic-dispatch seam in the crate: everything above it
/// works on region offsets and never cares where the bytes live. A store is
/// never resized while mapped; grow and shrink perform the unmap, resize,
/// remap sequence as a unit.
pub(crate) trait Storage {
    /// Current size of the backing store in bytes.
    fn size(&self) -> u32;

    /// Truncates or extends the backing store. Must not be mapped.
    fn resize(&mut self, size: u32) -> Result<()>;

    /// Maps the store into memory.
    fn map(&mut self) -> Result<Region>;

    /// Releases the mapping.
    fn unmap(&mut self, region: Region);
}

/// Heap-backed store: an anonymous container whose contents vanish when it
/// is dropped. Word storage keeps the base pointer 8-aligned for the Pod
/// views layered on top.
pub(crate) struct MemStore {
    words: Vec<u64>,
    size: u32,
    mapped: bool,
}

impl MemStore {
    pub(crate) fn new() -> Self {
        Self {
            words: Vec::new(),
            size: 0,
            mapped: false,
        }
    }
}

impl Storage for MemStore {
    fn size(&self) -> u32 {
        self.size
    }

    fn resize(&mut self, size: u32) -> Result<()> {
        debug_assert!(!self.mapped);

        self.words.resize(size.div_ceil(8) as usize, 0);
        self.size = size;
        Ok(())
    }

    fn map(&mut self) -> Result<Region> {
        debug_assert!(!self.mapped);

        if self.words.is_empty() {
            self.words.push(0);
        }

        self.mapped = true;
        let base = NonNull::new(self.words.as_mut_ptr().cast::<u8>())
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;

        // SAFETY: the buffer is never reallocated while mapped (resize
        // asserts unmapped), and `&mut self` access is funneled through the
        // owning container.
        Ok(unsafe { Region::new(base, self.size as usize) })
    }

    fn unmap(&mut self, _region: Region) {
        self.mapped = false;
    }
}

#[cfg(unix)]
pub(crate) use self::unix::DiskStore;

#[cfg(unix)]
mod unix {
    use core::num::NonZeroUsize;
    use std::fs::{File, OpenOptions};
    use std::os::fd::AsFd;
    use std::path::Path;

    use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
    use nix::unistd::ftruncate;

    use super::{OpenMode, Region, Storage};
    use crate::error::{Error, Result};

    /// File-backed store mapped with `MAP_SHARED`, so every region write
    /// lands in the page cache of the real file.
    pub(crate) struct DiskStore {
        file: File,
        size: u32,
        mapped: bool,
    }

    impl DiskStore {
        pub(crate) fn open(path: &Path, mode: OpenMode) -> Result<Self> {
            let file = match mode {
                OpenMode::CreateOrWipe => OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?,
                OpenMode::OpenExisting => {
                    OpenOptions::new().read(true).write(true).open(path)?
                }
            };

            let size = file.metadata()?.len();

            if size > u32::MAX as u64 {
                return Err(Error::TooLarge);
            }

            Ok(Self {
                file,
                size: size as u32,
                mapped: false,
            })
        }
    }

    impl Storage for DiskStore {
        fn size(&self) -> u32 {
            self.size
        }

        fn resize(&mut self, size: u32) -> Result<()> {
            debug_assert!(!self.mapped);

            ftruncate(self.file.as_fd(), i64::from(size))?;
            self.size = size;
            Ok(())
        }

        fn map(&mut self) -> Result<Region> {
            debug_assert!(!self.mapped);

            let len = match NonZeroUsize::new(self.size as usize) {
                Some(len) => len,
                None => return Err(nix::Error::EINVAL.into()),
            };

            // SAFETY: the fd is valid and the mapping is released before
            // the file is resized or closed.
            let base = unsafe {
                mmap(
                    None,
                    len,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_SHARED,
                    self.file.as_fd(),
                    0,
                )?
            };

            self.mapped = true;

            // SAFETY: mmap returned `len.get()` valid bytes.
            Ok(unsafe { Region::new(base.cast(), len.get()) })
        }

        fn unmap(&mut self, region: Region) {
            let len = region.len();

            // SAFETY: the region came from our own `map` call.
            if let Err(err) = unsafe { munmap(region.base.cast(), len) } {
                tracing::warn!(?err, "munmap failed");
            }

            self.mapped = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_store_resize_preserves_contents() {
        let mut store = MemStore::new();
        store.resize(4096).unwrap();

        let mut region = store.map().unwrap();
        region.bytes_mut()[100] = 0xAB;
        store.unmap(region);

        store.resize(8192).unwrap();
        let region = store.map().unwrap();
        assert_eq!(region.bytes().len(), 8192);
        assert_eq!(region.bytes()[100], 0xAB);
        assert_eq!(region.bytes()[5000], 0);
        store.unmap(region);
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_store_roundtrip() {
        let path = std::env::temp_dir().join(format!("shf-store-{}", std::process::id()));

        {
            let mut store = DiskStore::open(&path, OpenMode::CreateOrWipe).unwrap();
            assert_eq!(store.size(), 0);

            store.resize(4096).unwrap();
            let mut region = store.map().unwrap();
            region.bytes_mut()[0..4].copy_from_slice(b"shfy");
            store.unmap(region);
        }

        {
            let mut store = DiskStore::open(&path, OpenMode::OpenExisting).unwrap();
            assert_eq!(store.size(), 4096);

            let region = store.map().unwrap();
            assert_eq!(&region.bytes()[0..4], b"shfy");
            store.unmap(region);
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_store_open_missing_fails() {
        let path = std::env::temp_dir().join("shf-store-does-not-exist");
        assert!(DiskStore::open(&path, OpenMode::OpenExisting).is_err());
    }
}
