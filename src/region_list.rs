use std::fs;
use std::io;
use std::rc::Rc;

#[cfg(unix)]
use std::os::unix::io::RawFd;

use log::trace;

use crate::{Error, FileKey, Region, Result};

/// Per-file ordered collection of [`Region`]s, keyed by a [`FileKey`].
///
/// Invariant: `regions` is sorted strictly by `base_ofs` and no two regions'
/// ranges overlap. The list is created lazily on the first
/// `Manager::make_cursor` for a given key and dropped from the manager's
/// table once it holds no regions and no cursor is still registered against
/// it (see [`RegionList::register_cursor`] / [`RegionList::deregister_cursor`]).
#[derive(Debug)]
pub struct RegionList {
    key: FileKey,
    file_size: usize,
    regions: Vec<Rc<Region>>,
    /// Number of cursors currently associated with this list (valid or not),
    /// tracked explicitly rather than derived from a strong-count on the list
    /// itself, per the no-poking-refcounts guidance for the Cursor/RegionList
    /// edge.
    cursor_count: usize,
}

impl RegionList {
    pub(crate) fn open(key: FileKey) -> Result<Self> {
        let file_size = Self::stat_size(&key)?;
        trace!("opened region list for {key}, file_size={file_size}");
        Ok(Self {
            key,
            file_size,
            regions: Vec::new(),
            cursor_count: 0,
        })
    }

    fn stat_size(key: &FileKey) -> Result<usize> {
        match key {
            FileKey::Path(path) => Ok(fs::metadata(path)?.len() as usize),
            FileKey::Fd(fd) => Ok(Self::fd_size(*fd)? as usize),
        }
    }

    #[cfg(unix)]
    fn fd_size(fd: RawFd) -> Result<u64> {
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::fstat(fd, &mut stat) };
        if rc != 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(stat.st_size as u64)
    }

    #[cfg(not(unix))]
    fn fd_size(_fd: i32) -> Result<u64> {
        Err(Error::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "fd-keyed files are only supported on unix",
        )))
    }

    #[inline]
    pub fn key(&self) -> &FileKey {
        &self.key
    }

    #[inline]
    pub fn file_size(&self) -> usize {
        self.file_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub(crate) fn regions(&self) -> &[Rc<Region>] {
        &self.regions
    }

    /// Binary search for the region whose range contains `offset`.
    pub(crate) fn find_containing(&self, offset: usize) -> Option<Rc<Region>> {
        let idx = self
            .regions
            .partition_point(|r| r.ofs_begin() <= offset);
        if idx == 0 {
            return None;
        }
        let candidate = &self.regions[idx - 1];
        candidate.includes_ofs(offset).then(|| candidate.clone())
    }

    /// Index at which a region based at `offset` should be inserted to keep
    /// the list sorted by `base_ofs`.
    pub(crate) fn insert_pos(&self, offset: usize) -> usize {
        self.regions.partition_point(|r| r.ofs_begin() < offset)
    }

    #[inline]
    pub(crate) fn region_at(&self, idx: usize) -> Option<&Rc<Region>> {
        self.regions.get(idx)
    }

    pub(crate) fn insert(&mut self, idx: usize, region: Rc<Region>) {
        self.regions.insert(idx, region);
    }

    pub(crate) fn remove(&mut self, idx: usize) -> Rc<Region> {
        self.regions.remove(idx)
    }

    pub(crate) fn register_cursor(&mut self) {
        self.cursor_count += 1;
    }

    /// Returns the remaining registered-cursor count after deregistering one.
    pub(crate) fn deregister_cursor(&mut self) -> usize {
        self.cursor_count = self.cursor_count.saturating_sub(1);
        self.cursor_count
    }

    #[inline]
    pub(crate) fn cursor_count(&self) -> usize {
        self.cursor_count
    }
}
