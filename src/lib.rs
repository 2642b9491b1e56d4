//! Sliding-window memory-map manager.
//!
//! Lets client code read very large files through memory-mapped views while
//! bounding the process's total mapped address space and open file-handle
//! budget. Clients obtain lightweight [`Cursor`]s that expose a current
//! window into a file; as they move through the file, the [`Manager`]
//! transparently maps, reuses, and unmaps fixed-size aligned [`Region`]s,
//! evicting the least-recently-used unused region when a global memory or
//! handle limit would be exceeded.
//!
//! [`SlidingBuffer`] builds on a `Cursor` to present a byte/slice addressable
//! view across region boundaries, for callers that would rather index into a
//! file than manage windows themselves.
//!
//! This manager is single-threaded and synchronous: `Manager` and everything
//! reachable through it use `Rc`/`RefCell`/`Cell`, not `Arc`/`Mutex`. Nothing
//! here is safe to share across threads.

mod cursor;
mod error;
mod file_key;
mod manager;
mod page_size;
mod region;
mod region_list;
mod sliding_buffer;
mod window;

pub use cursor::Cursor;
pub use error::{Error, Result};
pub use file_key::FileKey;
pub use manager::{Manager, StaticManager};
pub use page_size::page_size;
pub use region::Region;
pub use region_list::RegionList;
pub use sliding_buffer::{BufferGuard, SlidingBuffer};
pub use window::Window;
