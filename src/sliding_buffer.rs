use std::cell::Cell;
use std::ops::{Deref, DerefMut};

use log::warn;

use crate::{Cursor, Error, Result};

/// Byte/slice view over a [`Cursor`], presenting a file (or a sub-range of
/// it) as a contiguous, index-and-slice addressable sequence, re-mapping the
/// cursor's window as needed (spec.md §4.6).
///
/// `SlidingBuffer` is a scoped resource: [`get`](SlidingBuffer::get) and
/// [`slice`](SlidingBuffer::slice) only work while the buffer has been
/// [`enter`](SlidingBuffer::enter)ed, matching the original source's
/// context-manager usage (`with SlidingWindowMapBuffer(...):`). Prefer
/// [`scoped_guard`](SlidingBuffer::scoped_guard) for RAII-based enter/exit
/// over calling `enter`/`exit` by hand.
pub struct SlidingBuffer {
    cursor: Cursor,
    offset: usize,
    size: usize,
    entry_count: Cell<usize>,
}

impl SlidingBuffer {
    /// Maps `cursor` at `offset` for `size` bytes (`None` means "to end of
    /// file") and requires the result to be valid; fails with
    /// [`Error::InvalidCursor`] otherwise.
    pub fn new(mut cursor: Cursor, offset: usize, size: Option<usize>) -> Result<Self> {
        let file_size = cursor.file_size()?;
        if offset >= file_size {
            return Err(Error::InvalidCursor);
        }
        let remaining = file_size - offset;
        let size = size.unwrap_or(remaining).min(remaining);

        cursor.use_region(offset, size)?;
        if !cursor.is_valid() {
            return Err(Error::InvalidCursor);
        }

        Ok(Self {
            cursor,
            offset,
            size,
            entry_count: Cell::new(0),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Enters the scoped-use interval; balances with [`exit`](Self::exit).
    /// Nested `enter`/`exit` pairs are supported via an internal counter.
    pub fn enter(&self) {
        self.entry_count.set(self.entry_count.get() + 1);
    }

    /// Exits the scoped-use interval. On reaching a zero count, releases the
    /// cursor's current region; further `get`/`slice` then fail with
    /// [`Error::NotEntered`] until [`enter`](Self::enter) is called again.
    pub fn exit(&mut self) {
        let remaining = self.entry_count.get().saturating_sub(1);
        self.entry_count.set(remaining);
        if remaining == 0 {
            self.cursor.unuse_region();
        }
    }

    /// RAII alternative to `enter`/`exit`: releases the region when the
    /// returned guard drops, even if the caller aborts mid-use.
    pub fn scoped_guard(&mut self) -> BufferGuard<'_> {
        self.enter();
        BufferGuard { buffer: self }
    }

    fn require_entered(&self) -> Result<()> {
        if self.entry_count.get() == 0 {
            Err(Error::NotEntered)
        } else {
            Ok(())
        }
    }

    /// Resolves a possibly-negative logical index (`i < 0` means "from end")
    /// to an offset relative to the buffer's start.
    fn resolve(&self, i: isize) -> usize {
        if i < 0 {
            (self.size as isize + i).max(0) as usize
        } else {
            i as usize
        }
    }

    /// Reads a single byte at logical index `i`.
    pub fn get(&mut self, i: isize) -> Result<u8> {
        self.require_entered()?;
        let rel = self.resolve(i);
        let abs = self.offset + rel;
        if !self.cursor.includes_ofs(abs) {
            self.cursor.use_region(abs, 1)?;
        }
        if !self.cursor.is_valid() {
            return Err(Error::InvalidCursor);
        }
        let local = abs - self.cursor.ofs_begin()?;
        Ok(self.cursor.buffer()?[local])
    }

    /// Reads the byte range `[i, j)` (negative indices and `j = None`,
    /// meaning "to end", handled as in [`get`](Self::get)). Zero-copies out
    /// of the current region when it already covers the whole range;
    /// otherwise walks forward remapping the cursor and concatenates.
    pub fn slice(&mut self, i: isize, j: Option<isize>) -> Result<Vec<u8>> {
        self.require_entered()?;
        let start = self.resolve(i);
        let end = match j {
            Some(j) => self.resolve(j),
            None => self.size,
        };
        if end <= start {
            return Ok(Vec::new());
        }

        let abs_start = self.offset + start;
        let abs_end = self.offset + end;

        if self.cursor.includes_ofs(abs_start) && self.cursor.ofs_end()? >= abs_end {
            let cursor_begin = self.cursor.ofs_begin()?;
            let local_start = abs_start - cursor_begin;
            let local_end = local_start + (end - start);
            return Ok(self.cursor.buffer()?[local_start..local_end].to_vec());
        }

        let mut out = Vec::with_capacity(end - start);
        let mut pos = abs_start;
        while pos < abs_end {
            let want = abs_end - pos;
            self.cursor.use_region(pos, want)?;
            if !self.cursor.is_valid() {
                return Err(Error::InvalidCursor);
            }
            let local_start = pos - self.cursor.ofs_begin()?;
            let available = self.cursor.buffer()?.len() - local_start;
            let take = available.min(want);
            out.extend_from_slice(&self.cursor.buffer()?[local_start..local_start + take]);
            pos += take;
        }
        Ok(out)
    }
}

impl Drop for SlidingBuffer {
    fn drop(&mut self) {
        if self.entry_count.get() != 0 {
            warn!(
                "SlidingBuffer dropped with {} outstanding enter() call(s)",
                self.entry_count.get()
            );
        }
        self.cursor.unuse_region();
    }
}

/// RAII guard returned by [`SlidingBuffer::scoped_guard`]; calls
/// [`SlidingBuffer::exit`] on drop.
pub struct BufferGuard<'a> {
    buffer: &'a mut SlidingBuffer,
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        self.buffer.exit();
    }
}

impl Deref for BufferGuard<'_> {
    type Target = SlidingBuffer;
    fn deref(&self) -> &SlidingBuffer {
        self.buffer
    }
}

impl DerefMut for BufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut SlidingBuffer {
        self.buffer
    }
}
