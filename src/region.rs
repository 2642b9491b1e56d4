use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
#[cfg(unix)]
use std::os::unix::io::{FromRawFd, RawFd};

use log::trace;
use memmap2::{Mmap, MmapOptions};

use crate::{Error, FileKey, Result, Window};

/// One live, read-only OS memory mapping of a contiguous range of a file.
///
/// A `Region` is placed at a page-aligned `base_ofs` and maps `length` bytes
/// (`length <= file_size - base_ofs`). It is immutable once constructed: the
/// only mutable piece of state is [`usage_count`](Region::usage_count), bumped
/// every time a [`Cursor`](crate::Cursor) (re)selects the region, which the
/// [`Manager`](crate::Manager)'s LRU collector uses as its recency key.
///
/// Regions are shared by value between the owning [`RegionList`](crate::RegionList)
/// and however many cursors currently point at them, via `Rc<Region>`. The
/// number of cursors pinning a region (its *client count*) is therefore just
/// `Rc::strong_count(region) - 1`, the `-1` accounting for the `RegionList`'s
/// own slot.
#[derive(Debug)]
pub struct Region {
    base_ofs: usize,
    length: usize,
    mapping: Mmap,
    usage_count: Cell<u64>,
}

impl Region {
    /// Opens `key` (or dup's the fd) and maps `window.ofs..window.ofs+window.size`
    /// read-only, clamped to the file's actual remaining length. `flags` is
    /// forwarded to the OS open call on platforms that support custom open
    /// flags; it has no effect when reusing an existing mapping.
    pub fn open(key: &FileKey, window: Window, file_size: usize, flags: u32) -> Result<Self> {
        let base_ofs = window.ofs;
        let length = window.size.min(file_size.saturating_sub(base_ofs));
        if length == 0 {
            return Err(Error::MapFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "requested window is empty or past end of file",
            )));
        }

        let file = Self::open_file(key, flags).map_err(Error::MapFailed)?;
        let mapping = unsafe {
            MmapOptions::new()
                .offset(base_ofs as u64)
                .len(length)
                .map(&file)
                .map_err(Error::MapFailed)?
        };
        // The file descriptor used to create the mapping is not needed once
        // the mapping exists; `file` drops (and closes) here.
        trace!("mapped region base_ofs={base_ofs} length={length} key={key}");

        Ok(Self {
            base_ofs,
            length,
            mapping,
            usage_count: Cell::new(0),
        })
    }

    #[cfg(unix)]
    fn open_file(key: &FileKey, flags: u32) -> io::Result<File> {
        match key {
            FileKey::Path(path) => OpenOptions::new()
                .read(true)
                .custom_flags(flags as i32)
                .open(path),
            FileKey::Fd(fd) => {
                let dup = unsafe { libc::dup(*fd as RawFd) };
                if dup < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(unsafe { File::from_raw_fd(dup) })
            }
        }
    }

    #[cfg(not(unix))]
    fn open_file(key: &FileKey, _flags: u32) -> io::Result<File> {
        match key {
            FileKey::Path(path) => OpenOptions::new().read(true).open(path),
            FileKey::Fd(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "fd-keyed regions are only supported on unix",
            )),
        }
    }

    #[inline]
    pub fn ofs_begin(&self) -> usize {
        self.base_ofs
    }

    #[inline]
    pub fn ofs_end(&self) -> usize {
        self.base_ofs + self.length
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn includes_ofs(&self, ofs: usize) -> bool {
        self.base_ofs <= ofs && ofs < self.ofs_end()
    }

    #[inline]
    pub fn buffer(&self) -> &[u8] {
        &self.mapping[..]
    }

    #[inline]
    pub fn usage_count(&self) -> u64 {
        self.usage_count.get()
    }

    #[inline]
    pub fn bump_usage(&self) {
        self.usage_count.set(self.usage_count.get() + 1);
    }
}
