use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::rc::Rc;

use log::{debug, trace};

use crate::{Cursor, Error, FileKey, Region, RegionList, Result, Window, page_size};

#[cfg(target_pointer_width = "64")]
const DEFAULT_WINDOW_SIZE: usize = 1 << 30; // 1 GiB
#[cfg(not(target_pointer_width = "64"))]
const DEFAULT_WINDOW_SIZE: usize = 32 * (1 << 20); // 32 MiB

#[cfg(target_pointer_width = "64")]
const DEFAULT_MAX_MEMORY: usize = 8 * (1 << 30); // 8 GiB
#[cfg(not(target_pointer_width = "64"))]
const DEFAULT_MAX_MEMORY: usize = 512 * (1 << 20); // 512 MiB

/// "Unbounded-ish" default for `max_handles` (spec.md §4.5).
const DEFAULT_MAX_HANDLES: usize = usize::MAX / 2;

/// Internal, dyn-dispatched surface shared by [`Manager`] and [`StaticManager`]
/// so a [`Cursor`] can be written once against either manager flavour (see
/// spec.md §9, "Dynamic method dispatch").
pub(crate) trait MemoryMapManager: fmt::Debug {
    fn window_size(&self) -> usize;
    fn page_size(&self) -> usize {
        page_size::page_size()
    }
    fn max_mapped_memory_size(&self) -> usize;
    fn max_file_handles(&self) -> usize;
    fn mapped_memory_size(&self) -> usize;
    fn num_file_handles(&self) -> usize;
    fn num_open_files(&self) -> usize;
    fn collect(&self) -> usize;

    fn region_list_for(&self, key: &FileKey) -> Result<Rc<RefCell<RegionList>>>;
    fn release_list_if_unused(&self, key: &FileKey);

    /// Core of `Cursor::use_region`: given the list and a requested
    /// `(offset, size)`, returns the region the cursor should adopt, or
    /// `None` if `offset` is past end of file. The cursor releases its own
    /// previous region before calling this (spec.md §4.4.2 step 3), so a
    /// region only pinned by the cursor being moved is already eligible for
    /// eviction by the time budget/LRU decisions are made here.
    fn ensure_region(
        &self,
        list: &Rc<RefCell<RegionList>>,
        offset: usize,
        size: usize,
        flags: u32,
    ) -> Result<Option<Rc<Region>>>;
}

/// Global `FileKey -> RegionList` registry that enforces memory and handle
/// budgets by evicting the least-recently-used unused [`Region`] (spec.md
/// §4.5). This is the "sliding" manager; see [`StaticManager`] for the
/// degenerate whole-file variant.
#[derive(Clone)]
pub struct Manager(Rc<ManagerInner>);

struct ManagerInner {
    lists: RefCell<HashMap<FileKey, Rc<RefCell<RegionList>>>>,
    window_size: usize,
    max_memory: usize,
    max_handles: usize,
    memory_in_use: Cell<usize>,
    handles_in_use: Cell<usize>,
}

impl fmt::Debug for ManagerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("window_size", &self.window_size)
            .field("max_memory", &self.max_memory)
            .field("max_handles", &self.max_handles)
            .field("memory_in_use", &self.memory_in_use.get())
            .field("handles_in_use", &self.handles_in_use.get())
            .finish()
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Manager {
    /// `window_size`/`max_memory`/`max_handles` of `0` pick the bitness
    /// appropriate default (spec.md §4.5).
    pub fn new(window_size: usize, max_memory: usize, max_handles: usize) -> Self {
        let window_size = if window_size == 0 {
            DEFAULT_WINDOW_SIZE
        } else {
            window_size
        };
        let max_memory = if max_memory == 0 {
            DEFAULT_MAX_MEMORY
        } else {
            max_memory
        };
        let max_handles = if max_handles == 0 {
            DEFAULT_MAX_HANDLES
        } else {
            max_handles
        };
        debug!(
            "new Manager window_size={window_size} max_memory={max_memory} max_handles={max_handles}"
        );
        Self(Rc::new(ManagerInner {
            lists: RefCell::new(HashMap::new()),
            window_size,
            max_memory,
            max_handles,
            memory_in_use: Cell::new(0),
            handles_in_use: Cell::new(0),
        }))
    }

    /// Looks up or lazily creates the `RegionList` for `key` and returns a new
    /// Associated-Invalid cursor over it.
    pub fn make_cursor(&self, key: impl Into<FileKey>) -> Result<Cursor> {
        let key = key.into();
        let list = self.0.region_list_for(&key)?;
        list.borrow_mut().register_cursor();
        let manager: Rc<dyn MemoryMapManager> = self.0.clone();
        Ok(Cursor::new_associated(manager, list))
    }

    /// Evicts every evictable region across all lists. Shorthand for a
    /// `_collect_lru(size = 0)` run; idempotent once nothing is pinned.
    pub fn collect(&self) -> usize {
        self.0.collect()
    }

    /// Windows-only escape hatch: force-unmaps every region whose path starts
    /// with `base_path` so the file can be unlinked. Any cursor still holding
    /// one of those regions afterward is in undefined-behaviour territory —
    /// this method is an explicit, deliberately unsafe operation (spec.md §5).
    pub fn force_unmap_matching(&self, base_path: &Path) -> usize {
        self.0.force_unmap_matching(base_path)
    }

    pub fn num_file_handles(&self) -> usize {
        self.0.num_file_handles()
    }

    pub fn num_open_files(&self) -> usize {
        self.0.num_open_files()
    }

    pub fn window_size(&self) -> usize {
        self.0.window_size
    }

    pub fn mapped_memory_size(&self) -> usize {
        self.0.memory_in_use.get()
    }

    pub fn max_mapped_memory_size(&self) -> usize {
        self.0.max_memory
    }

    pub fn max_file_handles(&self) -> usize {
        self.0.max_handles
    }

    pub fn page_size(&self) -> usize {
        page_size::page_size()
    }
}

impl ManagerInner {
    fn collect(&self) -> usize {
        self.collect_lru(0).unwrap_or(0)
    }

    /// `_collect_lru` from spec.md §4.5: evicts regions until
    /// `memory_in_use + size <= max_memory`, or everything evictable when
    /// `size == 0`.
    fn collect_lru(&self, size: usize) -> Result<usize> {
        let mut found = 0usize;
        loop {
            if size != 0 && self.memory_in_use.get() + size <= self.max_memory {
                break;
            }
            let Some((key, idx)) = self.find_lru_victim() else {
                if size != 0 && found == 0 {
                    return Err(Error::RegionCollectionError);
                }
                break;
            };
            let list = self.lists.borrow().get(&key).cloned();
            let Some(list) = list else { break };
            let region = list.borrow_mut().remove(idx);
            self.memory_in_use
                .set(self.memory_in_use.get() - region.size());
            self.handles_in_use.set(self.handles_in_use.get() - 1);
            trace!(
                "evicted region base_ofs={} length={} usage_count={}",
                region.ofs_begin(),
                region.size(),
                region.usage_count()
            );
            found += 1;
            self.release_list_if_unused(&key);
        }
        Ok(found)
    }

    /// Scans every region in every list for the lowest `usage_count` region
    /// with a client count of zero (`Rc::strong_count == 1`, i.e. only the
    /// list itself holds it). Ties favour the first one encountered.
    fn find_lru_victim(&self) -> Option<(FileKey, usize)> {
        let lists = self.lists.borrow();
        let mut best: Option<(FileKey, usize, u64)> = None;
        for (key, list) in lists.iter() {
            let list_ref = list.borrow();
            for (idx, region) in list_ref.regions().iter().enumerate() {
                if Rc::strong_count(region) > 1 {
                    continue;
                }
                let usage = region.usage_count();
                let better = match &best {
                    Some((_, _, best_usage)) => usage < *best_usage,
                    None => true,
                };
                if better {
                    best = Some((key.clone(), idx, usage));
                }
            }
        }
        best.map(|(key, idx, _)| (key, idx))
    }

    fn force_unmap_matching(&self, base_path: &Path) -> usize {
        let matching: Vec<FileKey> = self
            .lists
            .borrow()
            .keys()
            .filter(|k| {
                k.as_path()
                    .map(|p| p.starts_with(base_path))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let mut n = 0;
        for key in matching {
            let list = self.lists.borrow().get(&key).cloned();
            let Some(list) = list else { continue };
            let mut list_mut = list.borrow_mut();
            while list_mut.len() > 0 {
                let region = list_mut.remove(0);
                self.memory_in_use
                    .set(self.memory_in_use.get().saturating_sub(region.size()));
                self.handles_in_use
                    .set(self.handles_in_use.get().saturating_sub(1));
                n += 1;
            }
            drop(list_mut);
            self.release_list_if_unused(&key);
        }
        n
    }

    fn allocate_region(
        &self,
        list: &Rc<RefCell<RegionList>>,
        offset: usize,
        size: usize,
        flags: u32,
        file_size: usize,
        is_retry: bool,
    ) -> Result<Option<Rc<Region>>> {
        let (insert_pos, left, right) = {
            let list_ref = list.borrow();
            let insert_pos = list_ref.insert_pos(offset);
            let left = insert_pos
                .checked_sub(1)
                .and_then(|i| list_ref.region_at(i))
                .map(|r| Window::from_region(r))
                .unwrap_or(Window::new(0, 0));
            let right = list_ref
                .region_at(insert_pos)
                .map(|r| Window::from_region(r))
                .unwrap_or(Window::new(file_size, 0));
            (insert_pos, left, right)
        };

        let mut mid = Window::new(offset, size);
        mid.extend_left_to(left, self.window_size);
        mid.extend_right_to(right, self.window_size);
        mid.align();
        if mid.ofs_end() > right.ofs {
            mid.size = right.ofs - mid.ofs;
        }

        if self.memory_in_use.get() + self.window_size > self.max_memory {
            self.collect_lru(self.window_size)?;
        }

        let key = list.borrow().key().clone();
        // Handle exhaustion is treated exactly like the OS refusing the
        // mapping (spec.md §4.4.2 step 6): it goes through the same
        // collect-then-retry-once machinery as an actual `Region::open`
        // failure below, rather than failing immediately.
        let opened = if self.handles_in_use.get() >= self.max_handles {
            Err(Error::MapFailed(io::Error::other(
                "file handle budget exhausted",
            )))
        } else {
            Region::open(&key, mid, file_size, flags)
        };

        let region = match opened {
            Ok(region) => region,
            Err(err) if !is_retry => {
                debug!("region open failed ({err}), retrying after an aggressive collect");
                self.collect_lru(0)?;
                return self.allocate_region(list, offset, size, flags, file_size, true);
            }
            Err(err) => return Err(err),
        };

        let region = Rc::new(region);
        self.memory_in_use
            .set(self.memory_in_use.get() + region.size());
        self.handles_in_use.set(self.handles_in_use.get() + 1);
        list.borrow_mut().insert(insert_pos, region.clone());
        Ok(Some(region))
    }
}

impl MemoryMapManager for ManagerInner {
    fn window_size(&self) -> usize {
        self.window_size
    }

    fn max_mapped_memory_size(&self) -> usize {
        self.max_memory
    }

    fn max_file_handles(&self) -> usize {
        self.max_handles
    }

    fn mapped_memory_size(&self) -> usize {
        self.memory_in_use.get()
    }

    fn num_file_handles(&self) -> usize {
        self.handles_in_use.get()
    }

    fn num_open_files(&self) -> usize {
        self.lists
            .borrow()
            .values()
            .filter(|l| !l.borrow().is_empty())
            .count()
    }

    fn collect(&self) -> usize {
        ManagerInner::collect(self)
    }

    fn region_list_for(&self, key: &FileKey) -> Result<Rc<RefCell<RegionList>>> {
        if let Some(list) = self.lists.borrow().get(key) {
            return Ok(list.clone());
        }
        let list = Rc::new(RefCell::new(RegionList::open(key.clone())?));
        self.lists.borrow_mut().insert(key.clone(), list.clone());
        Ok(list)
    }

    fn release_list_if_unused(&self, key: &FileKey) {
        let mut lists = self.lists.borrow_mut();
        let should_remove = lists
            .get(key)
            .map(|list| {
                let list_ref = list.borrow();
                list_ref.is_empty() && list_ref.cursor_count() == 0
            })
            .unwrap_or(false);
        if should_remove {
            lists.remove(key);
            trace!("dropped region list for {key}");
        }
    }

    fn ensure_region(
        &self,
        list: &Rc<RefCell<RegionList>>,
        offset: usize,
        size: usize,
        flags: u32,
    ) -> Result<Option<Rc<Region>>> {
        let file_size = list.borrow().file_size();
        if offset >= file_size {
            return Ok(None);
        }

        if let Some(region) = list.borrow().find_containing(offset) {
            return Ok(Some(region));
        }

        self.allocate_region(list, offset, size, flags, file_size, false)
    }
}

/// Degenerate manager that maps each file whole, in a single [`Region`], the
/// first time a cursor uses it, and never evicts (spec.md §4.5). `window_size`
/// and `max_memory` are accepted for API symmetry but ignored.
#[derive(Clone)]
pub struct StaticManager(Rc<StaticManagerInner>);

struct StaticManagerInner {
    lists: RefCell<HashMap<FileKey, Rc<RefCell<RegionList>>>>,
    max_handles: usize,
    memory_in_use: Cell<usize>,
    handles_in_use: Cell<usize>,
}

impl fmt::Debug for StaticManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticManager")
            .field("memory_in_use", &self.0.memory_in_use.get())
            .field("handles_in_use", &self.0.handles_in_use.get())
            .finish()
    }
}

impl StaticManager {
    pub fn new(max_handles: usize) -> Self {
        let max_handles = if max_handles == 0 {
            DEFAULT_MAX_HANDLES
        } else {
            max_handles
        };
        Self(Rc::new(StaticManagerInner {
            lists: RefCell::new(HashMap::new()),
            max_handles,
            memory_in_use: Cell::new(0),
            handles_in_use: Cell::new(0),
        }))
    }

    pub fn make_cursor(&self, key: impl Into<FileKey>) -> Result<Cursor> {
        let key = key.into();
        let list = self.0.region_list_for(&key)?;
        list.borrow_mut().register_cursor();
        let manager: Rc<dyn MemoryMapManager> = self.0.clone();
        Ok(Cursor::new_associated(manager, list))
    }

    /// No-op for the static variant: there is nothing to evict. Always
    /// returns `0`.
    pub fn collect(&self) -> usize {
        0
    }

    pub fn num_file_handles(&self) -> usize {
        self.0.handles_in_use.get()
    }

    pub fn num_open_files(&self) -> usize {
        self.0
            .lists
            .borrow()
            .values()
            .filter(|l| !l.borrow().is_empty())
            .count()
    }

    pub fn mapped_memory_size(&self) -> usize {
        self.0.memory_in_use.get()
    }

    pub fn max_file_handles(&self) -> usize {
        self.0.max_handles
    }

    pub fn page_size(&self) -> usize {
        page_size::page_size()
    }
}

impl fmt::Debug for StaticManagerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticManagerInner").finish_non_exhaustive()
    }
}

impl MemoryMapManager for StaticManagerInner {
    fn window_size(&self) -> usize {
        usize::MAX
    }

    fn max_mapped_memory_size(&self) -> usize {
        usize::MAX
    }

    fn max_file_handles(&self) -> usize {
        self.max_handles
    }

    fn mapped_memory_size(&self) -> usize {
        self.memory_in_use.get()
    }

    fn num_file_handles(&self) -> usize {
        self.handles_in_use.get()
    }

    fn num_open_files(&self) -> usize {
        self.lists
            .borrow()
            .values()
            .filter(|l| !l.borrow().is_empty())
            .count()
    }

    fn collect(&self) -> usize {
        0
    }

    fn region_list_for(&self, key: &FileKey) -> Result<Rc<RefCell<RegionList>>> {
        if let Some(list) = self.lists.borrow().get(key) {
            return Ok(list.clone());
        }
        let list = Rc::new(RefCell::new(RegionList::open(key.clone())?));
        self.lists.borrow_mut().insert(key.clone(), list.clone());
        Ok(list)
    }

    fn release_list_if_unused(&self, key: &FileKey) {
        let mut lists = self.lists.borrow_mut();
        let should_remove = lists
            .get(key)
            .map(|list| {
                let list_ref = list.borrow();
                list_ref.is_empty() && list_ref.cursor_count() == 0
            })
            .unwrap_or(false);
        if should_remove {
            lists.remove(key);
        }
    }

    fn ensure_region(
        &self,
        list: &Rc<RefCell<RegionList>>,
        offset: usize,
        _size: usize,
        flags: u32,
    ) -> Result<Option<Rc<Region>>> {
        let (file_size, existing) = {
            let list_ref = list.borrow();
            (list_ref.file_size(), list_ref.region_at(0).cloned())
        };
        if offset >= file_size {
            return Ok(None);
        }
        if let Some(region) = existing {
            return Ok(Some(region));
        }

        let key = list.borrow().key().clone();
        let region = Region::open(&key, Window::new(0, file_size), file_size, flags)?;
        let region = Rc::new(region);
        self.memory_in_use
            .set(self.memory_in_use.get() + region.size());
        self.handles_in_use.set(self.handles_in_use.get() + 1);
        list.borrow_mut().insert(0, region.clone());
        Ok(Some(region))
    }
}
