use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

#[cfg(unix)]
use std::os::unix::io::RawFd;
#[cfg(not(unix))]
type RawFd = i32;

use crate::manager::MemoryMapManager;
use crate::{Error, Region, RegionList, Result};

/// A movable handle into one file's mapped regions.
///
/// A `Cursor` is always created by [`Manager::make_cursor`](crate::Manager::make_cursor)
/// or [`StaticManager::make_cursor`](crate::StaticManager::make_cursor), never
/// directly. At any moment it is in one of three states: **Unassociated** (no
/// file), **Associated-Invalid** (a file, but no current window), or
/// **Valid** (a file and a current window). [`Cursor::is_associated`] and
/// [`Cursor::is_valid`] distinguish them; most accessors return
/// [`Error::InvalidCursor`] outside the Valid state.
pub struct Cursor {
    manager: Rc<dyn MemoryMapManager>,
    list: Option<Rc<RefCell<RegionList>>>,
    region: Option<Rc<Region>>,
    rel_ofs: usize,
    size_visible: usize,
    flags: u32,
}

impl Cursor {
    pub(crate) fn new_associated(
        manager: Rc<dyn MemoryMapManager>,
        list: Rc<RefCell<RegionList>>,
    ) -> Self {
        Self {
            manager,
            list: Some(list),
            region: None,
            rel_ofs: 0,
            size_visible: 0,
            flags: 0,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.region.is_some()
    }

    #[inline]
    pub fn is_associated(&self) -> bool {
        self.list.is_some()
    }

    /// Releases the current region, if any. No-op if already invalid.
    pub fn unuse_region(&mut self) {
        self.region = None;
        self.rel_ofs = 0;
        self.size_visible = 0;
    }

    /// Assures the cursor points to a window covering `offset`, mapping up to
    /// `size` bytes (clamped to the manager's `window_size`). Leaves the
    /// cursor Invalid, without erroring, if `offset` is at or past end of
    /// file (spec.md §4.4.2); any other unrecoverable condition surfaces as
    /// an `Err`.
    pub fn use_region(&mut self, offset: usize, size: usize) -> Result<&mut Self> {
        self.use_region_with_flags(offset, size, self.flags)
    }

    pub fn use_region_with_flags(
        &mut self,
        offset: usize,
        size: usize,
        flags: u32,
    ) -> Result<&mut Self> {
        let Some(list) = self.list.clone() else {
            return Err(Error::InvalidCursor);
        };
        self.flags = flags;
        let size = size.min(self.manager.window_size());

        // Fast path (spec.md §4.4.2 step 2): the current region already
        // covers `offset`, reuse it without touching the manager.
        if let Some(region) = &self.region
            && region.includes_ofs(offset)
        {
            region.bump_usage();
            self.rel_ofs = offset - region.ofs_begin();
            self.size_visible = size.min(region.ofs_end() - offset);
            return Ok(self);
        }

        // Otherwise release the current region *before* asking the manager
        // for a replacement (spec.md §4.4.2 step 3), so a region only pinned
        // by this cursor is already eligible for LRU eviction by the time
        // the manager makes its budget/collection decisions.
        self.unuse_region();

        let region = self.manager.ensure_region(&list, offset, size, flags)?;

        let Some(region) = region else {
            return Ok(self);
        };

        region.bump_usage();
        self.rel_ofs = offset - region.ofs_begin();
        self.size_visible = size.min(region.ofs_end() - offset);
        self.region = Some(region);
        Ok(self)
    }

    #[inline]
    pub fn ofs_begin(&self) -> Result<usize> {
        let region = self.region.as_ref().ok_or(Error::InvalidCursor)?;
        Ok(region.ofs_begin() + self.rel_ofs)
    }

    #[inline]
    pub fn ofs_end(&self) -> Result<usize> {
        Ok(self.ofs_begin()? + self.size_visible)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size_visible
    }

    pub fn buffer(&self) -> Result<&[u8]> {
        let region = self.region.as_ref().ok_or(Error::InvalidCursor)?;
        let start = self.rel_ofs;
        let end = start + self.size_visible;
        Ok(&region.buffer()[start..end])
    }

    pub fn includes_ofs(&self, ofs: usize) -> bool {
        match (self.ofs_begin(), self.ofs_end()) {
            (Ok(begin), Ok(end)) => begin <= ofs && ofs < end,
            _ => false,
        }
    }

    pub fn file_size(&self) -> Result<usize> {
        self.list
            .as_ref()
            .map(|l| l.borrow().file_size())
            .ok_or(Error::InvalidCursor)
    }

    pub fn path(&self) -> Result<PathBuf> {
        let list = self.list.as_ref().ok_or(Error::InvalidCursor)?;
        let list = list.borrow();
        list.key()
            .as_path()
            .map(|p| p.to_path_buf())
            .ok_or(Error::WrongKeyKind {
                expected: "path",
                actual: list.key().kind_name(),
            })
    }

    pub fn fd(&self) -> Result<RawFd> {
        let list = self.list.as_ref().ok_or(Error::InvalidCursor)?;
        let list = list.borrow();
        list.key().as_fd().ok_or(Error::WrongKeyKind {
            expected: "fd",
            actual: list.key().kind_name(),
        })
    }

    /// Drops `self` and becomes a copy of `rhs`, matching the original
    /// source's `assign()` ("destroy, then copy from"). Equivalent to
    /// `*self = rhs.clone()`, spelled out because the spec names it
    /// explicitly (spec.md §4.4.5).
    pub fn assign(&mut self, rhs: &Cursor) {
        *self = rhs.clone();
    }
}

impl Clone for Cursor {
    /// Duplicates the manager/list references, copies `rel_ofs`/`size`, and
    /// if Valid, shares the current region (bumping its usage count) —
    /// spec.md §4.4.5.
    fn clone(&self) -> Self {
        if let Some(list) = &self.list {
            list.borrow_mut().register_cursor();
        }
        if let Some(region) = &self.region {
            region.bump_usage();
        }
        Self {
            manager: self.manager.clone(),
            list: self.list.clone(),
            region: self.region.clone(),
            rel_ofs: self.rel_ofs,
            size_visible: self.size_visible,
            flags: self.flags,
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.region = None;
        let Some(list) = self.list.take() else {
            return;
        };
        let key = list.borrow().key().clone();
        let remaining = list.borrow_mut().deregister_cursor();
        let should_release = remaining == 0 && list.borrow().is_empty();
        if should_release {
            self.manager.release_list_if_unused(&key);
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("is_associated", &self.is_associated())
            .field("is_valid", &self.is_valid())
            .field("rel_ofs", &self.rel_ofs)
            .field("size", &self.size_visible)
            .finish()
    }
}
